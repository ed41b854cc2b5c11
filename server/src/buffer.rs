use crate::store::{StoreError, StoreGateway};
use dashmap::DashMap;
use netbird_peer_types::{Account, AccountId, Group, NetworkRouter, Peer, Policy};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A read-only, immutable view of one account's topology, materialized once
/// per broadcast pass. Per the design note against cyclic object graphs,
/// this is a flat bundle of independently-keyed tables rather than an
/// `Account` with embedded collections.
#[derive(Clone, Debug)]
pub struct AccountSnapshot {
    pub account: Account,
    pub peers: Vec<Peer>,
    pub groups: Vec<Group>,
    pub policies: Vec<Policy>,
    pub routers: Vec<NetworkRouter>,
}

/// `GetAccountWithBackpressure`: a read-through cache from account ID to a
/// full snapshot. Concurrent callers for the same (uncached) account share
/// one in-flight load rather than hammering the store once per caller;
/// cached entries are served directly and invalidated explicitly by any
/// write path that commits a topology change.
pub struct AccountRequestBuffer<S: StoreGateway> {
    store: S,
    cache: DashMap<AccountId, Arc<AccountSnapshot>>,
    load_locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl<S: StoreGateway> AccountRequestBuffer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            load_locks: DashMap::new(),
        }
    }

    fn load_lock(&self, account_id: &AccountId) -> Arc<Mutex<()>> {
        self.load_locks
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get(&self, account_id: &AccountId) -> Result<Arc<AccountSnapshot>, StoreError> {
        if let Some(cached) = self.cache.get(account_id) {
            return Ok(cached.clone());
        }

        let lock = self.load_lock(account_id);
        let _guard = lock.lock().await;

        if let Some(cached) = self.cache.get(account_id) {
            return Ok(cached.clone());
        }

        let snapshot = Arc::new(self.load(account_id).await?);
        self.cache.insert(account_id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn load(&self, account_id: &AccountId) -> Result<AccountSnapshot, StoreError> {
        let account = self.store.get_account(account_id).await?;
        let peers = self.store.get_account_peers(account_id).await?;
        let groups = self.store.get_account_groups(account_id).await?;
        let policies = self.store.get_account_policies(account_id).await?;
        let routers = self.store.get_network_routers_by_account_id(account_id).await?;
        Ok(AccountSnapshot {
            account,
            peers,
            groups,
            policies,
            routers,
        })
    }

    /// Called by every write path that commits a topology change. The next
    /// `get` for this account re-reads from the store.
    pub fn invalidate(&self, account_id: &AccountId) {
        self.cache.remove(account_id);
    }
}
