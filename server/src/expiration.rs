//! Background login- and inactivity-expiration loops, one pair of tasks per
//! account. Each loop computes the soonest deadline among its account's
//! eligible peers and sleeps exactly that long rather than polling on a
//! fixed tick, only waking early for a store error.

use crate::broadcast::UpdateBroadcaster;
use crate::peer_validator::PeerValidator;
use crate::proxy::ProxyController;
use crate::store::StoreGateway;
use netbird_peer_types::{AccountId, Peer, PeerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct ExpirationScheduler<S: StoreGateway> {
    store: S,
    broadcaster: Arc<UpdateBroadcaster<S>>,
    peer_validator: Arc<dyn PeerValidator>,
    proxy: Arc<dyn ProxyController>,
    retry_interval: Duration,
    tasks: Mutex<HashMap<AccountId, JoinHandle<()>>>,
}

impl<S: StoreGateway + Clone> ExpirationScheduler<S> {
    pub fn new(
        store: S,
        broadcaster: Arc<UpdateBroadcaster<S>>,
        peer_validator: Arc<dyn PeerValidator>,
        proxy: Arc<dyn ProxyController>,
        retry_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            broadcaster,
            peer_validator,
            proxy,
            retry_interval,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Starts (or restarts) both expiration loops for one account. Callers
    /// re-invoke this whenever a peer's login/inactivity expiration setting
    /// changes, so the scheduler re-arms against the new minimum deadline
    /// instead of sleeping out a stale one.
    pub async fn schedule(self: &Arc<Self>, account_id: AccountId) {
        self.cancel(std::slice::from_ref(&account_id)).await;

        let this = self.clone();
        let spawn_id = account_id.clone();
        let handle = tokio::task::spawn(async move {
            tokio::join!(this.clone().run_login_loop(spawn_id.clone()), this.run_inactivity_loop(spawn_id));
        });
        self.tasks.lock().await.insert(account_id, handle);
    }

    /// `Cancel`: stops the background loops for the given accounts, e.g. on
    /// account deletion.
    pub async fn cancel(&self, account_ids: &[AccountId]) {
        let mut tasks = self.tasks.lock().await;
        for id in account_ids {
            if let Some(handle) = tasks.remove(id) {
                handle.abort();
            }
        }
    }

    async fn run_login_loop(self: Arc<Self>, account_id: AccountId) {
        loop {
            let (peers, settings) = match self.read_login_candidates(&account_id).await {
                Some(pair) => pair,
                None => {
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            let now = SystemTime::now();
            let expired: Vec<Peer> = peers
                .iter()
                .filter(|p| p.login_expired(&settings, now))
                .cloned()
                .collect();

            if !expired.is_empty() {
                self.expire_peers(&account_id, &expired).await;
                continue;
            }

            match next_deadline(&peers, settings.login_expiration, now, |p| p.last_login) {
                Some(sleep_for) => tokio::time::sleep(sleep_for).await,
                None => return,
            }
        }
    }

    async fn run_inactivity_loop(self: Arc<Self>, account_id: AccountId) {
        loop {
            let (peers, settings) = match self.read_inactivity_candidates(&account_id).await {
                Some(pair) => pair,
                None => {
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            let now = SystemTime::now();
            let expired: Vec<Peer> = peers
                .iter()
                .filter(|p| p.session_expired(&settings, now))
                .cloned()
                .collect();

            if !expired.is_empty() {
                self.expire_peers(&account_id, &expired).await;
                continue;
            }

            match next_deadline(&peers, settings.inactivity_expiration, now, |p| p.status.last_seen) {
                Some(sleep_for) => tokio::time::sleep(sleep_for).await,
                None => return,
            }
        }
    }

    async fn read_login_candidates(&self, account_id: &AccountId) -> Option<(Vec<Peer>, netbird_peer_types::AccountSettings)> {
        let peers = self
            .store
            .get_account_peers_with_expiration(account_id)
            .await
            .map_err(|e| log::warn!("login expiration scan for {account_id} failed: {e}, retrying"))
            .ok()?;
        let settings = self
            .store
            .get_account_settings(account_id)
            .await
            .map_err(|e| log::warn!("login expiration settings read for {account_id} failed: {e}, retrying"))
            .ok()?;
        Some((peers, settings))
    }

    async fn read_inactivity_candidates(&self, account_id: &AccountId) -> Option<(Vec<Peer>, netbird_peer_types::AccountSettings)> {
        let peers = self
            .store
            .get_account_peers_with_inactivity(account_id)
            .await
            .map_err(|e| log::warn!("inactivity expiration scan for {account_id} failed: {e}, retrying"))
            .ok()?;
        let settings = self
            .store
            .get_account_settings(account_id)
            .await
            .map_err(|e| log::warn!("inactivity expiration settings read for {account_id} failed: {e}, retrying"))
            .ok()?;
        Some((peers, settings))
    }

    async fn expire_peers(&self, account_id: &AccountId, peers: &[Peer]) {
        for peer in peers {
            let status = PeerStatus {
                connected: peer.status.connected,
                last_seen: peer.status.last_seen,
                login_expired: true,
            };
            let peer_id = peer.id.clone();
            if let Err(e) = self
                .store
                .execute_in_transaction(account_id, move |tx| tx.save_peer_status(&peer_id, status))
                .await
            {
                log::warn!("failed to mark peer {} expired: {e}", peer.id);
                continue;
            }
            self.broadcaster.channels().close_channel(&peer.id);
        }

        self.broadcaster.invalidate(account_id);
        self.broadcaster
            .buffer_update_account_peers(account_id.clone(), self.peer_validator.clone(), self.proxy.clone());
    }
}

/// Minimum remaining duration among `peers` before `window` elapses since
/// whatever instant `since` extracts, rounded up to at least one second so
/// the loop never busy-spins on a near-zero sleep. `None` means nothing in
/// this account is currently eligible to expire at all.
fn next_deadline<F: Fn(&Peer) -> SystemTime>(peers: &[Peer], window: Duration, now: SystemTime, since: F) -> Option<Duration> {
    peers
        .iter()
        .filter_map(|p| {
            let elapsed = now.duration_since(since(p)).unwrap_or_default();
            window.checked_sub(elapsed)
        })
        .min()
        .map(|remaining| remaining.max(Duration::from_secs(1)))
}
