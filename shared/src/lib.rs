//! Data model shared between the account peer manager and the store backends
//! that persist it. Nothing in this crate talks to a database, a socket, or a
//! filesystem: these are the aggregate types the rest of the workspace locks,
//! mutates, and serializes into network maps.

mod account;
mod dns;
mod group;
mod ids;
mod network_map;
mod peer;
mod policy;
mod route;
mod setup_key;

pub use account::{Account, AccountSettings, Network};
pub use dns::{parse_domain_label, DnsLabelError};
pub use group::Group;
pub use ids::{AccountId, GroupId, PeerId, PolicyId, RouteId, SetupKeyId, UserId};
pub use network_map::{DnsConfig, FirewallRule, NetworkMap, PeerConfig, ProxyNetworkMap, SyncResponse};
pub use peer::{Location, Peer, PeerMeta, PeerStatus, PeerUpdate};
pub use policy::{Policy, PostureCheckId, Protocol, Rule, RuleAction};
pub use route::NetworkRouter;
pub use setup_key::{SetupKey, SetupKeyError};

/// The implicit group every peer in an account belongs to.
pub const ALL_GROUP_NAME: &str = "All";
