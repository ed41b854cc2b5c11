use crate::buffer::{AccountRequestBuffer, AccountSnapshot};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::network_map::NetworkMapBuilder;
use crate::peer_validator::PeerValidator;
use crate::posture::PostureEngine;
use crate::proxy::ProxyController;
use crate::store::StoreGateway;
use dashmap::DashMap;
use netbird_peer_types::{AccountId, Group, GroupId, Peer, PeerId, SyncResponse};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};

pub type PushSender = mpsc::UnboundedSender<SyncResponse>;
pub type PushReceiver = mpsc::UnboundedReceiver<SyncResponse>;

/// `HasChannel`/`SendUpdate`/`CloseChannel`: one unbounded mpsc channel per
/// connected peer. Dropping the sender on close lets the receiving task
/// observe channel closure the same way a real transport would.
#[derive(Default)]
pub struct PushChannelRegistry {
    channels: DashMap<PeerId, PushSender>,
}

impl PushChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer_id: PeerId) -> PushReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(peer_id, tx);
        rx
    }

    pub fn has_channel(&self, peer_id: &PeerId) -> bool {
        self.channels.contains_key(peer_id)
    }

    /// Best-effort: a receiver dropped concurrently with a send is not an error.
    pub fn send_update(&self, peer_id: &PeerId, message: SyncResponse) {
        if let Some(sender) = self.channels.get(peer_id) {
            let _ = sender.send(message);
        }
    }

    pub fn close_channel(&self, peer_id: &PeerId) {
        self.channels.remove(peer_id);
    }
}

/// Per-account coalescing record: a lock slot plus a flag for "another
/// update arrived while a broadcast was already running". Matches the
/// `{Idle, Running, RunningWithPending}` state machine.
struct CoalesceState {
    mu: Arc<Mutex<()>>,
    pending: AtomicBool,
}

pub struct UpdateBroadcaster<S: StoreGateway> {
    buffer: AccountRequestBuffer<S>,
    config: ServerConfig,
    channels: Arc<PushChannelRegistry>,
    coalesce: DashMap<AccountId, Arc<CoalesceState>>,
}

pub(crate) fn group_index(groups: &[Group]) -> HashMap<PeerId, HashSet<GroupId>> {
    let mut index: HashMap<PeerId, HashSet<GroupId>> = HashMap::new();
    for group in groups {
        for peer_id in &group.peers {
            index.entry(peer_id.clone()).or_default().insert(group.id.clone());
        }
    }
    index
}

impl<S: StoreGateway + Clone> UpdateBroadcaster<S> {
    pub fn new(store: S, config: ServerConfig) -> Self {
        Self {
            buffer: AccountRequestBuffer::new(store),
            config,
            channels: Arc::new(PushChannelRegistry::new()),
            coalesce: DashMap::new(),
        }
    }

    pub fn channels(&self) -> Arc<PushChannelRegistry> {
        self.channels.clone()
    }

    /// Shared read-through access to the same account snapshot cache this
    /// broadcaster uses, so the Lifecycle Manager's `getValidatedPeerWithMap`
    /// reads consistent data without standing up a second cache.
    pub async fn snapshot(&self, account_id: &AccountId) -> Result<Arc<AccountSnapshot>, crate::store::StoreError> {
        self.buffer.get(account_id).await
    }

    /// Invalidates any cached snapshot for the account. Every lifecycle
    /// write path calls this inside the same commit that changed topology.
    pub fn invalidate(&self, account_id: &AccountId) {
        self.buffer.invalidate(account_id);
    }

    async fn build_and_send(
        &self,
        snapshot: &AccountSnapshot,
        target: &Peer,
        approved: &HashSet<PeerId>,
        peer_group_ids: &HashMap<PeerId, HashSet<GroupId>>,
        proxy: &dyn ProxyController,
    ) {
        let builder = NetworkMapBuilder::new();
        let posture = PostureEngine::new();
        let dns_domain = snapshot.account.settings.dns_domain.clone();

        let mut map = builder.build(
            &snapshot.account,
            target,
            &snapshot.peers,
            peer_group_ids,
            approved,
            &snapshot.policies,
            &snapshot.routers,
            dns_domain.as_deref(),
            &posture,
        );
        if let Some(overlay) = proxy.overlay_for(&target.id).await {
            map.merge_proxy_overlay(&overlay);
        }
        self.channels.send_update(&target.id, SyncResponse { network_map: map });
    }

    /// `UpdateAccountPeers`: fans out a map rebuild to every peer with an
    /// active push channel, bounded to `broadcaster_concurrency` in-flight
    /// builds. Always re-reads the snapshot -- per the design-notes
    /// resolution that a coalesced follow-up must reflect the latest commit
    /// rather than reuse a stale held snapshot.
    pub async fn update_account_peers(
        &self,
        account_id: &AccountId,
        peer_validator: &Arc<dyn PeerValidator>,
        proxy: &Arc<dyn ProxyController>,
    ) -> Result<(), ServerError> {
        self.buffer.invalidate(account_id);
        let snapshot = self.buffer.get(account_id).await?;

        let connected: Vec<PeerId> = snapshot
            .peers
            .iter()
            .filter(|p| self.channels.has_channel(&p.id))
            .map(|p| p.id.clone())
            .collect();
        if connected.is_empty() {
            return Ok(());
        }

        let approved = peer_validator
            .get_validated_peers(account_id, &snapshot.groups, &snapshot.peers, &snapshot.account.settings)
            .await?;
        let peer_group_ids = group_index(&snapshot.groups);

        let semaphore = Arc::new(Semaphore::new(self.config.broadcaster_concurrency.max(1)));
        let mut tasks = tokio::task::JoinSet::new();

        for peer_id in connected {
            let Some(target) = snapshot.peers.iter().find(|p| p.id == peer_id).cloned() else {
                continue;
            };
            let snapshot = snapshot.clone();
            let approved = approved.clone();
            let peer_group_ids = peer_group_ids.clone();
            let proxy = proxy.clone();
            let channels = self.channels.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("broadcaster semaphore is never closed");

            tasks.spawn(async move {
                let _permit = permit;
                let builder = NetworkMapBuilder::new();
                let posture = PostureEngine::new();
                let dns_domain = snapshot.account.settings.dns_domain.clone();
                let mut map = builder.build(
                    &snapshot.account,
                    &target,
                    &snapshot.peers,
                    &peer_group_ids,
                    &approved,
                    &snapshot.policies,
                    &snapshot.routers,
                    dns_domain.as_deref(),
                    &posture,
                );
                if let Some(overlay) = proxy.overlay_for(&target.id).await {
                    map.merge_proxy_overlay(&overlay);
                }
                channels.send_update(&target.id, SyncResponse { network_map: map });
            });
        }

        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    /// `UpdateAccountPeer`: single-peer variant for changes that affect only
    /// one peer's map (e.g. an SSH toggle).
    pub async fn update_account_peer(
        &self,
        account_id: &AccountId,
        peer_id: &PeerId,
        peer_validator: &Arc<dyn PeerValidator>,
        proxy: &Arc<dyn ProxyController>,
    ) -> Result<(), ServerError> {
        if !self.channels.has_channel(peer_id) {
            return Ok(());
        }
        let snapshot = self.buffer.get(account_id).await?;
        let Some(target) = snapshot.peers.iter().find(|p| &p.id == peer_id).cloned() else {
            return Ok(());
        };
        let approved = peer_validator
            .get_validated_peers(account_id, &snapshot.groups, &snapshot.peers, &snapshot.account.settings)
            .await?;
        let peer_group_ids = group_index(&snapshot.groups);
        self.build_and_send(&snapshot, &target, &approved, &peer_group_ids, proxy.as_ref()).await;
        Ok(())
    }

    /// `BufferUpdateAccountPeers`: the coalescing scheduler. At most one
    /// broadcast per account runs at a time; calls that arrive mid-broadcast
    /// set a pending flag that triggers exactly one follow-up run after
    /// `update_account_peers_buffer_interval`, rather than one run per call.
    pub fn buffer_update_account_peers(
        self: &Arc<Self>,
        account_id: AccountId,
        peer_validator: Arc<dyn PeerValidator>,
        proxy: Arc<dyn ProxyController>,
    ) {
        let state = self
            .coalesce
            .entry(account_id.clone())
            .or_insert_with(|| {
                Arc::new(CoalesceState {
                    mu: Arc::new(Mutex::new(())),
                    pending: AtomicBool::new(false),
                })
            })
            .clone();

        let guard = match state.mu.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                state.pending.store(true, Ordering::SeqCst);
                return;
            },
        };

        let this = self.clone();
        let buffer_interval = self.config.update_account_peers_buffer_interval;
        tokio::task::spawn(async move {
            let _guard = guard;
            loop {
                if let Err(e) = this.update_account_peers(&account_id, &peer_validator, &proxy).await {
                    log::warn!("broadcast for account {account_id} failed: {e}");
                }
                if !state.pending.swap(false, Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(buffer_interval).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_validator::DefaultPeerValidator;
    use crate::proxy::NoopProxyController;
    use crate::store::memory::MemoryStore;
    use netbird_peer_types::{Account, Location, PeerMeta, PeerStatus};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn test_peer(id: &str, account_id: &AccountId) -> Peer {
        Peer {
            id: PeerId::from(id),
            account_id: account_id.clone(),
            wireguard_public_key: format!("key-{id}"),
            meta: PeerMeta::default(),
            name: id.into(),
            dns_label: id.into(),
            ip: Ipv4Addr::new(100, 64, 0, 2),
            user_id: None,
            status: PeerStatus::default(),
            ssh_enabled: false,
            ssh_key: None,
            login_expiration_enabled: false,
            inactivity_expiration_enabled: false,
            added_with_sso_login: false,
            ephemeral: false,
            created_at: std::time::SystemTime::now(),
            last_login: std::time::SystemTime::now(),
            location: Location::default(),
            extra_dns_labels: vec![],
            allow_extra_dns_labels: false,
        }
    }

    #[tokio::test]
    async fn short_circuits_with_no_active_channels() {
        let store = MemoryStore::new();
        let account = Account::new(AccountId::from("a1"), "100.64.0.0/16".parse().unwrap());
        store.seed_account(account.clone());
        store.seed_peer(test_peer("p1", &account.id));

        let broadcaster = UpdateBroadcaster::new(store, ServerConfig::default());
        let validator: Arc<dyn PeerValidator> = Arc::new(DefaultPeerValidator);
        let proxy: Arc<dyn ProxyController> = Arc::new(NoopProxyController);
        broadcaster.update_account_peers(&account.id, &validator, &proxy).await.unwrap();
    }

    #[tokio::test]
    async fn delivers_to_a_registered_channel() {
        let store = MemoryStore::new();
        let account = Account::new(AccountId::from("a1"), "100.64.0.0/16".parse().unwrap());
        store.seed_account(account.clone());
        let peer = test_peer("p1", &account.id);
        store.seed_peer(peer.clone());

        let broadcaster = UpdateBroadcaster::new(store, ServerConfig::default());
        let mut rx = broadcaster.channels().register(peer.id.clone());

        let validator: Arc<dyn PeerValidator> = Arc::new(DefaultPeerValidator);
        let proxy: Arc<dyn ProxyController> = Arc::new(NoopProxyController);
        broadcaster.update_account_peers(&account.id, &validator, &proxy).await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(msg.network_map.remote_peers_is_empty);
    }
}
