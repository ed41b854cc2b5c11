//! Account-scoped peer lifecycle management for a mesh VPN control plane:
//! registering and validating peers, building per-peer network maps, and
//! keeping every peer in an account in sync as topology changes.
//!
//! This crate owns none of the wire protocol, HTTP routing, or SQL schema --
//! those are the surrounding service's job. What it owns is the logic that
//! decides what a given peer is allowed to see and when its view needs to be
//! refreshed.

mod activity;
mod allocator;
mod broadcast;
mod buffer;
mod config;
mod error;
mod expiration;
mod geolocation;
mod idp;
mod lifecycle;
mod locks;
mod network_map;
mod permission;
mod peer_validator;
mod posture;
mod proxy;
pub mod store;

pub use activity::{ActivityEvent, ActivityLog, NoopActivityLog};
pub use allocator::{AllocationError, PeerAllocator};
pub use broadcast::UpdateBroadcaster;
pub use buffer::AccountRequestBuffer;
pub use config::ServerConfig;
pub use error::ServerError;
pub use expiration::ExpirationScheduler;
pub use geolocation::{GeolocationResolver, NoopGeolocationResolver};
pub use idp::{IdentityProviderClient, NoopIdentityProviderClient};
pub use lifecycle::{
    AddPeerCredential, AddPeerRequest, LifecycleResult, LoginRequest, PeerLifecycleManager, SyncRequest,
    UpdatePeerRequest,
};
pub use permission::{DefaultPermissionValidator, PermissionValidator};
pub use peer_validator::{DefaultPeerValidator, PeerValidator};
pub use proxy::{NoopProxyController, ProxyController};

use locks::{AccountLocks, PeerKeyLocks};
use std::sync::Arc;
use store::StoreGateway;

/// Everything a request handler needs, wired once at startup and cloned
/// cheaply per request. Mirrors the reference server's `Context`: a bundle
/// of `Arc`-shared state rather than a god object with its own methods.
pub struct Context<S: StoreGateway> {
    pub store: S,
    pub config: ServerConfig,
    pub account_locks: AccountLocks,
    pub peer_key_locks: PeerKeyLocks,
    pub broadcaster: Arc<UpdateBroadcaster<S>>,
    pub peer_validator: Arc<dyn PeerValidator>,
    pub permission_validator: Arc<dyn PermissionValidator>,
    pub activity_log: Arc<dyn ActivityLog>,
    pub geolocation: Arc<dyn GeolocationResolver>,
    pub idp: Arc<dyn IdentityProviderClient>,
    pub proxy: Arc<dyn ProxyController>,
}

impl<S: StoreGateway + Clone> Context<S> {
    /// Builds a context with the no-op default for every pluggable trait.
    /// Suitable for tests and for embedding until the surrounding service
    /// wires in its own identity provider, geolocation database, etc.
    pub fn with_defaults(store: S, config: ServerConfig) -> Self {
        let broadcaster = Arc::new(UpdateBroadcaster::new(store.clone(), config.clone()));
        Self {
            store,
            config,
            account_locks: AccountLocks::default(),
            peer_key_locks: PeerKeyLocks::default(),
            broadcaster,
            peer_validator: Arc::new(DefaultPeerValidator),
            permission_validator: Arc::new(DefaultPermissionValidator),
            activity_log: Arc::new(NoopActivityLog),
            geolocation: Arc::new(NoopGeolocationResolver),
            idp: Arc::new(NoopIdentityProviderClient),
            proxy: Arc::new(NoopProxyController),
        }
    }

    pub fn lifecycle_manager(&self) -> PeerLifecycleManager<'_, S> {
        PeerLifecycleManager::new(self)
    }
}

impl<S: StoreGateway + Clone> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            account_locks: self.account_locks.clone(),
            peer_key_locks: self.peer_key_locks.clone(),
            broadcaster: self.broadcaster.clone(),
            peer_validator: self.peer_validator.clone(),
            permission_validator: self.permission_validator.clone(),
            activity_log: self.activity_log.clone(),
            geolocation: self.geolocation.clone(),
            idp: self.idp.clone(),
            proxy: self.proxy.clone(),
        }
    }
}
