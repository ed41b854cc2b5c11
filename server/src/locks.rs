use dashmap::DashMap;
use netbird_peer_types::AccountId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// `AcquireWriteLockByUID`/`AcquireReadLockByUID`: one advisory lock slot per
/// account, held for the duration of a single lifecycle operation across its
/// store transaction. Held guards may cross `.await` points, so these are
/// `tokio::sync` primitives rather than `parking_lot`'s.
#[derive(Clone, Default)]
pub struct AccountLocks {
    slots: DashMap<AccountId, Arc<RwLock<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, account_id: &AccountId) -> Arc<RwLock<()>> {
        self.slots
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn write(&self, account_id: &AccountId) -> OwnedRwLockWriteGuard<()> {
        self.slot(account_id).write_owned().await
    }

    pub async fn read(&self, account_id: &AccountId) -> OwnedRwLockReadGuard<()> {
        self.slot(account_id).read_owned().await
    }
}

/// A lock by WireGuard public key, serializing duplicate `LoginPeer` calls
/// for the same peer.
#[derive(Clone, Default)]
pub struct PeerKeyLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl PeerKeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, public_key: &str) -> OwnedMutexGuard<()> {
        let slot = self
            .slots
            .entry(public_key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        slot.lock_owned().await
    }
}
