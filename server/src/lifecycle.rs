//! The Lifecycle Manager: the six operations that take a peer from first
//! contact through to removal, each acquiring whatever locks its step of
//! the hierarchy calls for (account read/write, then peer-key write for
//! `LoginPeer`) before touching the store.

use crate::activity::ActivityEvent;
use crate::allocator::{AllocationError, PeerAllocator};
use crate::network_map::NetworkMapBuilder;
use crate::permission::{Module, Operation};
use crate::posture::PostureEngine;
use crate::store::{LockMode, StoreError, StoreGateway};
use crate::{Context, ServerError};
use netbird_peer_types::{
    parse_domain_label, AccountId, GroupId, Location, NetworkMap, Peer, PeerConfig, PeerId, PeerMeta,
    PeerStatus, PeerUpdate, SetupKey, SyncResponse, UserId,
};
use std::net::{IpAddr, Ipv4Addr};
use std::time::SystemTime;

/// How a new peer authenticated itself to `AddPeer`. Exactly one of these is
/// ever true for a given registration; user/organization CRUD is out of
/// scope here, so the user path takes the account and auto-groups the
/// caller already resolved rather than looking a user up itself.
pub enum AddPeerCredential {
    SetupKey(String),
    User {
        account_id: AccountId,
        user_id: UserId,
        auto_groups: Vec<GroupId>,
    },
}

pub struct AddPeerRequest {
    pub credential: AddPeerCredential,
    pub wireguard_public_key: String,
    pub meta: PeerMeta,
    pub connection_ip: Option<IpAddr>,
    pub extra_dns_labels: Vec<String>,
}

pub struct LoginRequest {
    pub wireguard_public_key: String,
    pub user_id: Option<UserId>,
    pub meta: PeerMeta,
    pub ssh_key: Option<String>,
    pub extra_dns_labels: Vec<String>,
    /// Supplied by the caller so an unknown pubkey can fall through to
    /// `AddPeer` without a second round trip.
    pub new_peer: Option<AddPeerRequest>,
}

pub struct SyncRequest {
    pub wireguard_public_key: String,
    pub meta: PeerMeta,
    pub extra_dns_labels: Vec<String>,
}

#[derive(Default)]
pub struct UpdatePeerRequest {
    pub peer_id: PeerId,
    pub name: Option<String>,
    pub ssh_enabled: Option<bool>,
    pub login_expiration_enabled: Option<bool>,
    pub inactivity_expiration_enabled: Option<bool>,
}

pub struct LifecycleResult {
    pub peer: Peer,
    pub network_map: NetworkMap,
}

pub struct PeerLifecycleManager<'a, S: StoreGateway> {
    ctx: &'a Context<S>,
}

impl<'a, S: StoreGateway + Clone> PeerLifecycleManager<'a, S> {
    pub fn new(ctx: &'a Context<S>) -> Self {
        Self { ctx }
    }

    /// `AddPeer`: registers a brand-new peer via setup key or a caller-
    /// authenticated user, allocating its IP/DNS label under the account
    /// write lock and retrying on a unique-constraint collision.
    pub async fn add_peer(&self, request: AddPeerRequest) -> Result<LifecycleResult, ServerError> {
        if self
            .ctx
            .store
            .get_peer_by_pubkey(&request.wireguard_public_key)
            .await
            .is_ok()
        {
            return Err(ServerError::PreconditionFailed("peer has been already registered".into()));
        }

        let (account_id, auto_groups, ephemeral, allow_extra_dns_labels, added_with_sso_login, user_id, setup_key_id, event, event_meta) =
            match &request.credential {
                AddPeerCredential::SetupKey(secret) => {
                    let key = self
                        .ctx
                        .store
                        .get_setup_key_by_secret(&SetupKey::hash_secret(secret))
                        .await
                        .map_err(|_| ServerError::PreconditionFailed("setup key is not valid".into()))?;
                    key.is_valid(SystemTime::now())
                        .map_err(|e| ServerError::PreconditionFailed(e.to_string()))?;
                    (
                        key.account_id.clone(),
                        key.auto_groups.clone(),
                        key.ephemeral,
                        key.allow_extra_dns_labels,
                        false,
                        None,
                        Some(key.id.clone()),
                        ActivityEvent::PeerAddedWithSetupKey,
                        serde_json::json!({ "setup_key_name": key.name }),
                    )
                }
                AddPeerCredential::User { account_id, user_id, auto_groups } => (
                    account_id.clone(),
                    auto_groups.clone(),
                    false,
                    true,
                    true,
                    Some(user_id.clone()),
                    None,
                    ActivityEvent::PeerAddedByUser,
                    serde_json::Value::Null,
                ),
            };

        let mut hostname = request.meta.hostname.clone();
        if let Some(user_id) = &user_id {
            let lowered = hostname.to_lowercase();
            if lowered.contains("iphone") || lowered.contains("ipad") {
                if let Some(email) = self.ctx.idp.get_user_email(user_id).await {
                    if let Some(local_part) = email.split('@').next() {
                        hostname = format!("{hostname}-{local_part}");
                    }
                }
            }
        }

        for label in &request.extra_dns_labels {
            parse_domain_label(label).map_err(|e| ServerError::InvalidArgument(e.to_string()))?;
        }
        if !allow_extra_dns_labels && !request.extra_dns_labels.is_empty() {
            return Err(ServerError::PreconditionFailed(
                "extra DNS labels are not allowed for this registration".into(),
            ));
        }

        let location = match request.connection_ip {
            Some(ip) => self.ctx.geolocation.resolve(ip).await.unwrap_or_default(),
            None => Location::default(),
        };

        let now = SystemTime::now();
        let mut meta = request.meta.clone();
        meta.hostname = hostname.clone();
        let base_peer = Peer {
            id: PeerId::generate(),
            account_id: account_id.clone(),
            wireguard_public_key: request.wireguard_public_key.clone(),
            meta,
            name: hostname,
            dns_label: String::new(),
            ip: Ipv4Addr::UNSPECIFIED,
            user_id: user_id.clone(),
            status: PeerStatus {
                connected: false,
                last_seen: now,
                login_expired: false,
            },
            ssh_enabled: false,
            ssh_key: None,
            login_expiration_enabled: added_with_sso_login,
            inactivity_expiration_enabled: added_with_sso_login,
            added_with_sso_login,
            ephemeral,
            created_at: now,
            last_login: now,
            location,
            extra_dns_labels: request.extra_dns_labels.clone(),
            allow_extra_dns_labels,
        };

        let settings = self.ctx.store.get_account_settings(&account_id).await?;
        let base_peer = self
            .ctx
            .peer_validator
            .prepare_peer(&account_id, base_peer, &auto_groups, &settings)
            .await;

        let retry_budget = self.ctx.config.allocator_retry_budget;
        let allocator = PeerAllocator::new(retry_budget);
        let mut committed: Option<Peer> = None;
        let mut last_error = ServerError::Internal("ip/dns allocation exhausted".into());

        for _ in 0..retry_budget {
            let guard = self.ctx.account_locks.write(&account_id).await;
            let account = self.ctx.store.get_account(&account_id).await?;
            let (ip, label) = match allocator
                .allocate(&self.ctx.store, &account_id, &account.network.cidr, &base_peer.name)
                .await
            {
                Ok(pair) => pair,
                Err(AllocationError::Exhausted(n)) => {
                    drop(guard);
                    last_error = ServerError::Internal(format!("ip/dns allocation exhausted after {n} attempts"));
                    continue;
                }
                Err(AllocationError::Store(e)) => return Err(e.into()),
            };

            let mut peer = base_peer.clone();
            peer.ip = ip;
            peer.dns_label = label;
            let peer_for_tx = peer.clone();
            let auto_groups_for_tx = auto_groups.clone();
            let setup_key_id_for_tx = setup_key_id.clone();
            let user_id_for_tx = user_id.clone();

            let result = self
                .ctx
                .store
                .execute_in_transaction(&account_id, move |tx| {
                    tx.add_peer_to_account(peer_for_tx.clone())?;
                    for group in &auto_groups_for_tx {
                        tx.add_peer_to_group(group, &peer_for_tx.id)?;
                    }
                    tx.add_peer_to_all_group(&peer_for_tx.account_id, &peer_for_tx.id)?;
                    if let Some(key_id) = &setup_key_id_for_tx {
                        // Re-check under Update: the fast-path check above only
                        // held a Share-loaded key, so a concurrent revoke or
                        // usage-limit exhaustion since then must be caught here.
                        let key = tx.get_setup_key_by_id(key_id, LockMode::Update)?;
                        key.is_valid(now).map_err(|e| StoreError::PreconditionFailed(e.to_string()))?;
                        tx.increment_setup_key_usage(key_id)?;
                    }
                    if let Some(user_id) = &user_id_for_tx {
                        tx.save_user_last_login(user_id, now)?;
                    }
                    tx.increment_network_serial(&peer_for_tx.account_id)?;
                    Ok(())
                })
                .await;
            drop(guard);

            match result {
                Ok(()) => {
                    committed = Some(peer);
                    break;
                }
                Err(StoreError::UniqueConstraint) => {
                    last_error = ServerError::UniqueConstraint;
                    continue;
                }
                Err(StoreError::PreconditionFailed(msg)) => return Err(ServerError::PreconditionFailed(msg)),
                Err(e) => return Err(e.into()),
            }
        }

        let peer = committed.ok_or(last_error)?;
        self.ctx.broadcaster.invalidate(&account_id);

        self.ctx
            .activity_log
            .store_event(user_id.as_ref(), &peer.id, &account_id, event, event_meta)
            .await;

        if self.any_group_active(&account_id, &auto_groups).await? {
            self.ctx.broadcaster.buffer_update_account_peers(
                account_id.clone(),
                self.ctx.peer_validator.clone(),
                self.ctx.proxy.clone(),
            );
        }

        let groups = self.ctx.store.get_groups_by_ids(&account_id, &auto_groups).await?;
        let (requires_approval, _) = self
            .ctx
            .peer_validator
            .is_not_valid_peer(&account_id, &peer, &groups, &settings)
            .await?;

        self.get_validated_peer_with_map(&account_id, peer, requires_approval).await
    }

    /// `LoginPeer`: falls through to `AddPeer` for an unknown key, otherwise
    /// re-authenticates the peer against `request.user_id` and applies the
    /// same meta/SSH-key merge as `SyncPeer` plus the re-auth bookkeeping.
    pub async fn login_peer(&self, request: LoginRequest) -> Result<LifecycleResult, ServerError> {
        let existing = self.ctx.store.get_peer_by_pubkey(&request.wireguard_public_key).await;
        let peer = match existing {
            Ok(peer) => peer,
            Err(StoreError::NotFound) => {
                let new_peer = request.new_peer.ok_or(ServerError::PeerNotRegistered)?;
                return self.add_peer(new_peer).await;
            }
            Err(e) => return Err(e.into()),
        };

        let settings = self.ctx.store.get_account_settings(&peer.account_id).await?;
        // A freshly authenticated user ID is itself a re-login: it clears
        // expiration rather than being blocked by it. Only a credential-less
        // retry against an already-expired peer gets rejected here.
        if request.user_id.is_none() && peer.login_expired(&settings, SystemTime::now()) {
            return Err(ServerError::PeerLoginExpired);
        }

        self.sync_inner(
            peer,
            request.user_id.as_ref(),
            &request.meta,
            &request.extra_dns_labels,
            request.ssh_key.as_deref(),
            true,
        )
        .await
    }

    /// `SyncPeer`: the same inner path as `LoginPeer`, minus re-authentication
    /// and the SSH key overwrite.
    pub async fn sync_peer(&self, request: SyncRequest) -> Result<LifecycleResult, ServerError> {
        let peer = self
            .ctx
            .store
            .get_peer_by_pubkey(&request.wireguard_public_key)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ServerError::PeerNotRegistered,
                other => other.into(),
            })?;

        let settings = self.ctx.store.get_account_settings(&peer.account_id).await?;
        if peer.login_expired(&settings, SystemTime::now()) {
            return Err(ServerError::PeerLoginExpired);
        }

        self.sync_inner(peer, None, &request.meta, &request.extra_dns_labels, None, false).await
    }

    async fn sync_inner(
        &self,
        peer: Peer,
        login_user_id: Option<&UserId>,
        meta: &PeerMeta,
        extra_dns_labels: &[String],
        ssh_key: Option<&str>,
        reauthenticate: bool,
    ) -> Result<LifecycleResult, ServerError> {
        let account_id = peer.account_id.clone();

        if reauthenticate {
            if let (Some(login_user), Some(existing_user)) = (login_user_id, &peer.user_id) {
                if existing_user != login_user {
                    return Err(ServerError::PeerLoginMismatch);
                }
            }
        }

        let _account_guard = self.ctx.account_locks.read(&account_id).await;
        let _peer_guard = self.ctx.peer_key_locks.lock(&peer.wireguard_public_key).await;

        // Re-read under the peer-key lock: a concurrent Login/Sync for the
        // same key may have committed since the pre-check above.
        let mut current = self.ctx.store.get_peer_by_id(&peer.id, LockMode::None).await?;
        let settings = self.ctx.store.get_account_settings(&account_id).await?;
        let group_ids = self.ctx.store.get_peer_group_ids(&current.id).await?;
        let groups = self.ctx.store.get_groups_by_ids(&account_id, &group_ids).await?;

        let mut changed = false;
        let mut reauthenticated_user: Option<UserId> = None;
        let mut reauthenticated_at = SystemTime::now();
        if reauthenticate {
            if let Some(login_user) = login_user_id {
                reauthenticated_at = SystemTime::now();
                current.user_id = Some(login_user.clone());
                current.last_login = reauthenticated_at;
                current.status.login_expired = false;
                changed = true;
                reauthenticated_user = Some(login_user.clone());
            }
        }

        for label in extra_dns_labels {
            parse_domain_label(label).map_err(|e| ServerError::InvalidArgument(e.to_string()))?;
        }
        if !current.allow_extra_dns_labels && !extra_dns_labels.is_empty() {
            return Err(ServerError::PreconditionFailed(
                "extra DNS labels are not allowed for this peer".into(),
            ));
        }

        let update = PeerUpdate {
            meta: Some(meta.clone()),
            ssh_key: None,
            extra_dns_labels: extra_dns_labels.to_vec(),
        };
        let (mut validated, validator_changed) = self
            .ctx
            .peer_validator
            .validate_peer(&update, &current, login_user_id, &account_id, settings.dns_domain.as_deref(), &groups, &settings)
            .await?;
        if validator_changed {
            changed = true;
        }

        if reauthenticate {
            if let Some(key) = ssh_key {
                if validated.ssh_key.as_deref() != Some(key) {
                    validated.ssh_key = Some(key.to_string());
                    changed = true;
                }
            }
        }

        let (not_valid, status_changed) = self
            .ctx
            .peer_validator
            .is_not_valid_peer(&account_id, &validated, &groups, &settings)
            .await?;

        if changed {
            let to_save = validated.clone();
            let user_for_tx = reauthenticated_user.clone();
            self.ctx
                .store
                .execute_in_transaction(&account_id, move |tx| {
                    tx.save_peer(to_save)?;
                    if let Some(user_id) = &user_for_tx {
                        tx.save_user_last_login(user_id, reauthenticated_at)?;
                    }
                    Ok(())
                })
                .await?;
        }

        drop(_peer_guard);
        drop(_account_guard);

        if let Some(user_id) = &reauthenticated_user {
            self.ctx
                .activity_log
                .store_event(Some(user_id), &validated.id, &account_id, ActivityEvent::UserLoggedInPeer, serde_json::Value::Null)
                .await;
        }

        if changed || status_changed {
            self.ctx.broadcaster.invalidate(&account_id);
            self.ctx.broadcaster.buffer_update_account_peers(
                account_id.clone(),
                self.ctx.peer_validator.clone(),
                self.ctx.proxy.clone(),
            );
        }

        self.get_validated_peer_with_map(&account_id, validated, not_valid).await
    }

    /// `UpdatePeer`: rename (with DNS-label fallback on collision), SSH
    /// toggle, and login/inactivity expiration toggles -- the latter two
    /// gated on the peer having been added with SSO login, since a
    /// setup-key peer has no session to expire.
    pub async fn update_peer(
        &self,
        account_id: &AccountId,
        user_id: &UserId,
        update: UpdatePeerRequest,
    ) -> Result<Peer, ServerError> {
        if !self
            .ctx
            .permission_validator
            .validate_user_permissions(account_id, user_id, Module::Peers, Operation::Update)
            .await?
        {
            return Err(ServerError::PermissionDenied);
        }

        let guard = self.ctx.account_locks.write(account_id).await;
        let mut peer = self.ctx.store.get_peer_by_id(&update.peer_id, LockMode::None).await?;
        if &peer.account_id != account_id {
            return Err(ServerError::PeerNotPartOfAccount);
        }

        let mut events = Vec::new();

        if let Some(name) = &update.name {
            if &peer.name != name {
                peer.name = name.clone();
                let base_label = parse_domain_label(name).unwrap_or_else(|_| "peer".to_string());
                let collides = self.ctx.store.dns_label_in_use(account_id, &base_label).await?;
                peer.dns_label = if collides && base_label != peer.dns_label {
                    let octets = peer.ip.octets();
                    format!("{base_label}-{}-{}", octets[2], octets[3])
                } else {
                    base_label
                };
                events.push(ActivityEvent::PeerRenamed);
            }
        }

        if let Some(enabled) = update.ssh_enabled {
            if peer.ssh_enabled != enabled {
                peer.ssh_enabled = enabled;
                events.push(if enabled { ActivityEvent::PeerSshEnabled } else { ActivityEvent::PeerSshDisabled });
            }
        }

        if let Some(enabled) = update.login_expiration_enabled {
            if peer.added_with_sso_login && peer.login_expiration_enabled != enabled {
                peer.login_expiration_enabled = enabled;
                events.push(if enabled {
                    ActivityEvent::PeerLoginExpirationEnabled
                } else {
                    ActivityEvent::PeerLoginExpirationDisabled
                });
            }
        }

        if let Some(enabled) = update.inactivity_expiration_enabled {
            if peer.added_with_sso_login && peer.inactivity_expiration_enabled != enabled {
                peer.inactivity_expiration_enabled = enabled;
                events.push(if enabled {
                    ActivityEvent::PeerInactivityExpirationEnabled
                } else {
                    ActivityEvent::PeerInactivityExpirationDisabled
                });
            }
        }

        if events.is_empty() {
            return Ok(peer);
        }

        let to_save = peer.clone();
        self.ctx
            .store
            .execute_in_transaction(account_id, move |tx| tx.save_peer(to_save))
            .await?;
        drop(guard);

        for event in events {
            self.ctx
                .activity_log
                .store_event(Some(user_id), &peer.id, account_id, event, serde_json::Value::Null)
                .await;
        }

        self.ctx.broadcaster.invalidate(account_id);
        self.ctx
            .broadcaster
            .update_account_peer(account_id, &peer.id, &self.ctx.peer_validator, &self.ctx.proxy)
            .await?;

        Ok(peer)
    }

    /// `DeletePeer`: rejects peers still bound to an ingress proxy or in use
    /// as a network router, then removes it from every group, deletes the
    /// row, and pushes a final empty map before closing its channel.
    pub async fn delete_peer(&self, account_id: &AccountId, user_id: &UserId, peer_id: &PeerId) -> Result<(), ServerError> {
        if !self
            .ctx
            .permission_validator
            .validate_user_permissions(account_id, user_id, Module::Peers, Operation::Delete)
            .await?
        {
            return Err(ServerError::PermissionDenied);
        }

        let guard = self.ctx.account_locks.write(account_id).await;
        let peer = self.ctx.store.get_peer_by_id(peer_id, LockMode::None).await?;
        if &peer.account_id != account_id {
            return Err(ServerError::PeerNotPartOfAccount);
        }

        if self.ctx.proxy.is_bound(peer_id).await {
            return Err(ServerError::PreconditionFailed("peer is still bound to an ingress proxy".into()));
        }
        let routers = self.ctx.store.get_network_routers_by_account_id(account_id).await?;
        if routers.iter().any(|r| &r.peer == peer_id) {
            return Err(ServerError::PreconditionFailed("peer is in use as a network router".into()));
        }

        self.ctx
            .store
            .execute_in_transaction(account_id, |tx| {
                tx.remove_peer_from_all_groups(account_id, peer_id)?;
                tx.delete_peer(account_id, peer_id)?;
                tx.increment_network_serial(account_id)?;
                Ok(())
            })
            .await?;
        drop(guard);

        let settings = self.ctx.store.get_account_settings(account_id).await?;
        self.ctx.peer_validator.peer_deleted(account_id, peer_id, &settings).await;

        self.ctx.broadcaster.channels().send_update(
            peer_id,
            SyncResponse {
                network_map: NetworkMap::pending_approval(0, PeerConfig::from(&peer)),
            },
        );
        self.ctx.broadcaster.channels().close_channel(peer_id);

        self.ctx
            .activity_log
            .store_event(Some(user_id), peer_id, account_id, ActivityEvent::PeerRemovedByUser, serde_json::Value::Null)
            .await;

        self.ctx.broadcaster.invalidate(account_id);
        self.ctx.broadcaster.buffer_update_account_peers(
            account_id.clone(),
            self.ctx.peer_validator.clone(),
            self.ctx.proxy.clone(),
        );

        Ok(())
    }

    /// `MarkPeerConnected`: updates connection status and geolocation, and
    /// re-arms a broadcast only when the peer was transitioning out of a
    /// login-expired state (any other connect/disconnect is invisible to
    /// other peers' maps).
    pub async fn mark_peer_connected(
        &self,
        public_key: &str,
        connected: bool,
        connection_ip: Option<IpAddr>,
    ) -> Result<(), ServerError> {
        let peer = self.ctx.store.get_peer_by_pubkey(public_key).await?;
        let account_id = peer.account_id.clone();
        let peer_id = peer.id.clone();
        let was_login_expired = peer.status.login_expired;

        let location = match connection_ip {
            Some(ip) => self.ctx.geolocation.resolve(ip).await,
            None => None,
        };

        // A successful connection clears a stale login-expired flag: the
        // peer couldn't have connected without a currently valid session.
        let login_expired = if connected { false } else { peer.status.login_expired };
        let status = PeerStatus {
            connected,
            last_seen: SystemTime::now(),
            login_expired,
        };

        self.ctx
            .store
            .execute_in_transaction(&account_id, move |tx| {
                tx.save_peer_status(&peer_id, status)?;
                if let Some(loc) = location {
                    tx.save_peer_location(&peer_id, loc)?;
                }
                Ok(())
            })
            .await?;

        if was_login_expired && connected {
            self.ctx.broadcaster.invalidate(&account_id);
            self.ctx.broadcaster.buffer_update_account_peers(
                account_id.clone(),
                self.ctx.peer_validator.clone(),
                self.ctx.proxy.clone(),
            );
        }

        Ok(())
    }

    async fn any_group_active(&self, account_id: &AccountId, group_ids: &[GroupId]) -> Result<bool, ServerError> {
        if group_ids.is_empty() {
            return Ok(false);
        }
        let policies = self.ctx.store.get_account_policies(account_id).await?;
        Ok(policies
            .iter()
            .filter(|p| p.enabled)
            .any(|p| p.referenced_groups().any(|g| group_ids.contains(g))))
    }

    /// `getValidatedPeerWithMap`: a peer pending approval gets the minimal
    /// map (its own config, nothing else); everyone else gets the full
    /// visibility-rule computation over a fresh account snapshot.
    async fn get_validated_peer_with_map(
        &self,
        account_id: &AccountId,
        peer: Peer,
        requires_approval: bool,
    ) -> Result<LifecycleResult, ServerError> {
        if requires_approval {
            let account = self.ctx.store.get_account(account_id).await?;
            let map = NetworkMap::pending_approval(account.network.serial, PeerConfig::from(&peer));
            return Ok(LifecycleResult { peer, network_map: map });
        }

        let snapshot = self.ctx.broadcaster.snapshot(account_id).await?;
        let peer_group_ids = crate::broadcast::group_index(&snapshot.groups);
        let approved = self
            .ctx
            .peer_validator
            .get_validated_peers(account_id, &snapshot.groups, &snapshot.peers, &snapshot.account.settings)
            .await?;

        let builder = NetworkMapBuilder::new();
        let posture = PostureEngine::new();
        let dns_domain = snapshot.account.settings.dns_domain.clone();
        let mut map = builder.build(
            &snapshot.account,
            &peer,
            &snapshot.peers,
            &peer_group_ids,
            &approved,
            &snapshot.policies,
            &snapshot.routers,
            dns_domain.as_deref(),
            &posture,
        );
        if let Some(overlay) = self.ctx.proxy.overlay_for(&peer.id).await {
            map.merge_proxy_overlay(&overlay);
        }
        Ok(LifecycleResult { peer, network_map: map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::store::memory::MemoryStore;
    use netbird_peer_types::Account;

    fn setup() -> (Context<MemoryStore>, AccountId) {
        let store = MemoryStore::new();
        let account = Account::new(AccountId::generate(), "100.64.0.0/16".parse().unwrap());
        store.seed_account(account.clone());
        let ctx = Context::with_defaults(store, ServerConfig::default());
        (ctx, account.id)
    }

    #[tokio::test]
    async fn add_peer_via_setup_key_allocates_and_returns_a_map() {
        let (ctx, account_id) = setup();
        let key = SetupKey {
            id: netbird_peer_types::SetupKeyId::generate(),
            account_id: account_id.clone(),
            name: "ci".into(),
            hashed_secret: SetupKey::hash_secret("SECRET"),
            auto_groups: vec![],
            ephemeral: false,
            allow_extra_dns_labels: false,
            revoked: false,
            expires_at: None,
            usage_limit: None,
            used_times: 0,
        };
        ctx.store.seed_setup_key(key);

        let manager = ctx.lifecycle_manager();
        let result = manager
            .add_peer(AddPeerRequest {
                credential: AddPeerCredential::SetupKey("SECRET".into()),
                wireguard_public_key: "pubkey-1".into(),
                meta: PeerMeta {
                    hostname: "ci-runner".into(),
                    ..Default::default()
                },
                connection_ip: None,
                extra_dns_labels: vec![],
            })
            .await
            .unwrap();

        assert_eq!(result.peer.dns_label, "ci-runner");
        assert!(result.network_map.remote_peers_is_empty);
    }

    #[tokio::test]
    async fn add_peer_rejects_duplicate_pubkey() {
        let (ctx, account_id) = setup();
        let key = SetupKey {
            id: netbird_peer_types::SetupKeyId::generate(),
            account_id: account_id.clone(),
            name: "ci".into(),
            hashed_secret: SetupKey::hash_secret("SECRET"),
            auto_groups: vec![],
            ephemeral: false,
            allow_extra_dns_labels: false,
            revoked: false,
            expires_at: None,
            usage_limit: None,
            used_times: 0,
        };
        ctx.store.seed_setup_key(key);
        let manager = ctx.lifecycle_manager();

        let request = || AddPeerRequest {
            credential: AddPeerCredential::SetupKey("SECRET".into()),
            wireguard_public_key: "pubkey-1".into(),
            meta: PeerMeta::default(),
            connection_ip: None,
            extra_dns_labels: vec![],
        };
        manager.add_peer(request()).await.unwrap();
        let err = manager.add_peer(request()).await.unwrap_err();
        assert!(matches!(err, ServerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn sync_peer_rejects_unregistered_key() {
        let (ctx, _account_id) = setup();
        let manager = ctx.lifecycle_manager();
        let err = manager
            .sync_peer(SyncRequest {
                wireguard_public_key: "unknown".into(),
                meta: PeerMeta::default(),
                extra_dns_labels: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::PeerNotRegistered));
    }

    #[tokio::test]
    async fn delete_peer_removes_it_and_closes_its_channel() {
        let (ctx, account_id) = setup();
        let key = SetupKey {
            id: netbird_peer_types::SetupKeyId::generate(),
            account_id: account_id.clone(),
            name: "ci".into(),
            hashed_secret: SetupKey::hash_secret("SECRET"),
            auto_groups: vec![],
            ephemeral: false,
            allow_extra_dns_labels: false,
            revoked: false,
            expires_at: None,
            usage_limit: None,
            used_times: 0,
        };
        ctx.store.seed_setup_key(key);
        let manager = ctx.lifecycle_manager();
        let added = manager
            .add_peer(AddPeerRequest {
                credential: AddPeerCredential::SetupKey("SECRET".into()),
                wireguard_public_key: "pubkey-1".into(),
                meta: PeerMeta::default(),
                connection_ip: None,
                extra_dns_labels: vec![],
            })
            .await
            .unwrap();

        let user_id = UserId::from("admin");
        manager.delete_peer(&account_id, &user_id, &added.peer.id).await.unwrap();
        assert!(ctx.store.get_peer_by_id(&added.peer.id, LockMode::None).await.is_err());
    }
}
