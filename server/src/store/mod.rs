//! Transactional access to persisted entities. `StoreGateway` is a generic
//! trait bound (not a trait object) so the Lifecycle Manager, Broadcaster,
//! and expiration schedulers monomorphize over whichever backend is wired
//! in; `MemoryStore` is the one concrete, in-memory implementation this
//! crate ships, suitable for tests and for embedding until a SQL-backed
//! store is provided by the surrounding service.

pub mod memory;

use netbird_peer_types::{
    Account, AccountId, AccountSettings, Group, GroupId, Network, NetworkRouter, Peer, PeerId,
    Policy, SetupKey, SetupKeyId, UserId,
};
use std::net::Ipv4Addr;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    /// Signals a collision on a unique column (peer pubkey, account-scoped IP
    /// or DNS label, account-scoped name). Callers that can retry -- the
    /// allocator -- catch this specifically; everything else propagates it.
    #[error("unique constraint violated")]
    UniqueConstraint,
    /// A row failed a business-rule check reloaded inside the transaction
    /// (e.g. a setup key revoked or exhausted between the fast-path check
    /// and the transaction that consumes it). Not retried.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Row lock strength requested for a read. Mirrors the reference store's
/// `SELECT ... FOR [SHARE|UPDATE]` distinction even though `MemoryStore` has
/// no row-level locking of its own to speak of -- the mode is still threaded
/// through so a SQL-backed implementation can honor it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// No row lock: read committed.
    None,
    /// Shared read lock: blocks concurrent writers, not other readers.
    Share,
    /// Exclusive row lock: blocks all concurrent access to the row.
    Update,
}

/// The mutating half of a store transaction. Synchronous by design -- every
/// concrete operation here (an in-memory table mutation, or a single
/// `rusqlite`-style statement against an already-open connection) completes
/// without suspending, so a transaction's body is an ordinary closure rather
/// than something that has to be polled.
pub trait StoreTransaction {
    fn get_peer_by_id(&self, peer_id: &PeerId, lock: LockMode) -> Result<Peer, StoreError>;
    fn get_setup_key_by_id(&self, key_id: &SetupKeyId, lock: LockMode) -> Result<SetupKey, StoreError>;
    fn get_peer_group_ids(&self, peer_id: &PeerId) -> Result<Vec<GroupId>, StoreError>;

    fn save_peer(&mut self, peer: Peer) -> Result<(), StoreError>;
    fn save_peer_status(&mut self, peer_id: &PeerId, status: netbird_peer_types::PeerStatus) -> Result<(), StoreError>;
    fn save_peer_location(&mut self, peer_id: &PeerId, location: netbird_peer_types::Location) -> Result<(), StoreError>;

    /// Inserts a brand-new peer row. Returns `UniqueConstraint` if the
    /// pubkey, IP, or DNS label already exists within the account.
    fn add_peer_to_account(&mut self, peer: Peer) -> Result<(), StoreError>;
    fn add_peer_to_group(&mut self, group_id: &GroupId, peer_id: &PeerId) -> Result<(), StoreError>;
    fn add_peer_to_all_group(&mut self, account_id: &AccountId, peer_id: &PeerId) -> Result<(), StoreError>;
    fn remove_peer_from_all_groups(&mut self, account_id: &AccountId, peer_id: &PeerId) -> Result<(), StoreError>;
    fn delete_peer(&mut self, account_id: &AccountId, peer_id: &PeerId) -> Result<(), StoreError>;

    fn increment_setup_key_usage(&mut self, key_id: &SetupKeyId) -> Result<(), StoreError>;
    /// Bumps `NetworkSerial` and returns the new value. Always called inside
    /// the same transaction as the topology change it accompanies.
    fn increment_network_serial(&mut self, account_id: &AccountId) -> Result<u64, StoreError>;
    fn save_user_last_login(&mut self, user_id: &UserId, at: SystemTime) -> Result<(), StoreError>;
}

/// Transactional, multi-entity access to one account's persisted state.
/// Implemented as a native `async fn` trait (no `dyn` dispatch) so callers
/// are generic over the backend; see `MemoryStore` for the reference
/// implementation.
pub trait StoreGateway: Send + Sync + 'static {
    fn get_peer_by_id(&self, peer_id: &PeerId, lock: LockMode) -> impl std::future::Future<Output = Result<Peer, StoreError>> + Send;
    fn get_peer_by_pubkey(&self, public_key: &str) -> impl std::future::Future<Output = Result<Peer, StoreError>> + Send;
    fn get_account_id_by_peer_pubkey(&self, public_key: &str) -> impl std::future::Future<Output = Result<AccountId, StoreError>> + Send;
    fn get_account(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Account, StoreError>> + Send;
    fn get_account_peers(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Vec<Peer>, StoreError>> + Send;
    fn get_account_settings(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<AccountSettings, StoreError>> + Send;
    fn get_account_network(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Network, StoreError>> + Send;
    fn get_setup_key_by_secret(&self, hashed_secret: &str) -> impl std::future::Future<Output = Result<SetupKey, StoreError>> + Send;
    fn get_groups_by_ids(&self, account_id: &AccountId, ids: &[GroupId]) -> impl std::future::Future<Output = Result<Vec<Group>, StoreError>> + Send;
    fn get_account_groups(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Vec<Group>, StoreError>> + Send;
    fn get_account_policies(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Vec<Policy>, StoreError>> + Send;
    fn get_network_routers_by_account_id(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Vec<NetworkRouter>, StoreError>> + Send;
    /// Peers with `LoginExpirationEnabled=true`, used by the login scheduler
    /// to compute `getNextLoginExpiration`/`getExpiredPeers`.
    fn get_account_peers_with_expiration(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Vec<Peer>, StoreError>> + Send;
    /// Peers with `InactivityExpirationEnabled=true`.
    fn get_account_peers_with_inactivity(&self, account_id: &AccountId) -> impl std::future::Future<Output = Result<Vec<Peer>, StoreError>> + Send;
    fn get_peer_group_ids(&self, peer_id: &PeerId) -> impl std::future::Future<Output = Result<Vec<GroupId>, StoreError>> + Send;

    /// Allocates a free IPv4 + reserves it by attempting an insert with a
    /// unique constraint; used only by the allocator's probe path, not by
    /// `add_peer_to_account` (which enforces uniqueness on the real insert).
    fn ip_in_use(&self, account_id: &AccountId, ip: Ipv4Addr) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
    fn dns_label_in_use(&self, account_id: &AccountId, label: &str) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    fn execute_in_transaction<F, T>(&self, account_id: &AccountId, f: F) -> impl std::future::Future<Output = Result<T, StoreError>> + Send
    where
        F: FnOnce(&mut dyn StoreTransaction) -> Result<T, StoreError> + Send,
        T: Send;
}
