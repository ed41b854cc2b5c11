//! End-to-end scenarios for the peer lifecycle, each driven through
//! `PeerLifecycleManager` against a fresh `MemoryStore` the way a real
//! gRPC/REST handler would drive it.

use async_trait::async_trait;
use netbird_peer_manager::store::memory::MemoryStore;
use netbird_peer_manager::{
    AddPeerCredential, AddPeerRequest, Context, IdentityProviderClient, ServerConfig, ServerError,
    SyncRequest, UpdatePeerRequest,
};
use netbird_peer_types::{Account, AccountId, GroupId, PeerMeta, SetupKey, SetupKeyId, UserId};
use std::time::{Duration, SystemTime};

fn account_with_network(id: &str) -> Account {
    Account::new(AccountId::from(id), "100.64.0.0/16".parse().unwrap())
}

fn meta(hostname: &str) -> PeerMeta {
    PeerMeta {
        hostname: hostname.into(),
        ..Default::default()
    }
}

fn setup_key(account_id: &AccountId, secret: &str, auto_groups: Vec<GroupId>) -> SetupKey {
    SetupKey {
        id: SetupKeyId::from("k1"),
        account_id: account_id.clone(),
        name: "ci-key".into(),
        hashed_secret: SetupKey::hash_secret(secret),
        auto_groups,
        ephemeral: false,
        allow_extra_dns_labels: false,
        revoked: false,
        expires_at: None,
        usage_limit: None,
        used_times: 0,
    }
}

/// Scenario 1: register via setup key, then sync.
#[tokio::test]
async fn register_via_setup_key_then_sync() {
    let store = MemoryStore::new();
    let account = account_with_network("a1");
    store.seed_account(account.clone());
    store.seed_setup_key(setup_key(&account.id, "ABC123", vec![]));

    let ctx = Context::with_defaults(store, ServerConfig::default());
    let manager = ctx.lifecycle_manager();

    let result = manager
        .add_peer(AddPeerRequest {
            credential: AddPeerCredential::SetupKey("ABC123".into()),
            wireguard_public_key: "pubkey-1".into(),
            meta: meta("laptop-1"),
            connection_ip: None,
            extra_dns_labels: vec![],
        })
        .await
        .expect("registration succeeds");

    assert!(account.network.cidr.contains(&result.peer.ip));
    assert_eq!(result.peer.dns_label, "laptop-1");
    assert!(result.network_map.remote_peers_is_empty);

    let key = ctx
        .store
        .get_setup_key_by_secret(&SetupKey::hash_secret("ABC123"))
        .await
        .unwrap();
    assert_eq!(key.used_times, 1);

    let account_after = ctx.store.get_account(&account.id).await.unwrap();
    assert_eq!(account_after.network.serial, account.network.serial + 1);

    let synced = manager
        .sync_peer(SyncRequest {
            wireguard_public_key: "pubkey-1".into(),
            meta: meta("laptop-1"),
            extra_dns_labels: vec![],
        })
        .await
        .expect("sync succeeds");
    assert_eq!(synced.peer.id, result.peer.id);
}

/// Scenario 2: duplicate registration of the same pubkey.
#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let store = MemoryStore::new();
    let account = account_with_network("a1");
    store.seed_account(account.clone());
    store.seed_setup_key(setup_key(&account.id, "ABC123", vec![]));

    let ctx = Context::with_defaults(store, ServerConfig::default());
    let manager = ctx.lifecycle_manager();

    let request = || AddPeerRequest {
        credential: AddPeerCredential::SetupKey("ABC123".into()),
        wireguard_public_key: "pubkey-1".into(),
        meta: meta("laptop-1"),
        connection_ip: None,
        extra_dns_labels: vec![],
    };

    manager.add_peer(request()).await.expect("first registration succeeds");
    let err = manager.add_peer(request()).await.unwrap_err();
    match err {
        ServerError::PreconditionFailed(msg) => assert_eq!(msg, "peer has been already registered"),
        other => panic!("expected PreconditionFailed, got {other:?}"),
    }
}

struct StaticIdp(&'static str);

#[async_trait]
impl IdentityProviderClient for StaticIdp {
    async fn get_user_email(&self, _user_id: &UserId) -> Option<String> {
        Some(self.0.to_string())
    }
}

/// Scenario 3: iPhone hostname rewrite.
#[tokio::test]
async fn iphone_hostname_is_rewritten_with_idp_email() {
    let store = MemoryStore::new();
    let account = account_with_network("a1");
    store.seed_account(account.clone());

    let mut ctx = Context::with_defaults(store, ServerConfig::default());
    ctx.idp = std::sync::Arc::new(StaticIdp("alice@example.com"));
    let manager = ctx.lifecycle_manager();

    let result = manager
        .add_peer(AddPeerRequest {
            credential: AddPeerCredential::User {
                account_id: account.id.clone(),
                user_id: UserId::from("u1"),
                auto_groups: vec![],
            },
            wireguard_public_key: "pubkey-iphone".into(),
            meta: meta("iPhone"),
            connection_ip: None,
            extra_dns_labels: vec![],
        })
        .await
        .expect("registration succeeds");

    assert_eq!(result.peer.name, "iPhone-alice");
}

/// Scenario 4: login when expired, then again with a matching user.
#[tokio::test]
async fn login_rejects_when_expired_then_succeeds_with_matching_user() {
    let store = MemoryStore::new();
    let account = account_with_network("a1");
    let mut settings = account.settings.clone();
    settings.login_expiration_enabled = true;
    settings.login_expiration = Duration::from_secs(24 * 60 * 60);
    let mut account = account;
    account.settings = settings;
    store.seed_account(account.clone());

    let ctx = Context::with_defaults(store.clone(), ServerConfig::default());
    let manager = ctx.lifecycle_manager();

    let added = manager
        .add_peer(AddPeerRequest {
            credential: AddPeerCredential::User {
                account_id: account.id.clone(),
                user_id: UserId::from("u1"),
                auto_groups: vec![],
            },
            wireguard_public_key: "pubkey-expired".into(),
            meta: meta("laptop"),
            connection_ip: None,
            extra_dns_labels: vec![],
        })
        .await
        .expect("registration succeeds");
    assert!(added.peer.added_with_sso_login);
    assert!(added.peer.login_expiration_enabled);

    // Backdate the peer's last login past the expiration window.
    let mut stale = ctx.store.get_peer_by_id(&added.peer.id, netbird_peer_manager::store::LockMode::None).await.unwrap();
    stale.last_login = SystemTime::now() - Duration::from_secs(25 * 60 * 60);
    ctx.store
        .execute_in_transaction(&account.id, {
            let stale = stale.clone();
            move |tx| tx.save_peer(stale)
        })
        .await
        .unwrap();

    let err = manager
        .login_peer(netbird_peer_manager::LoginRequest {
            wireguard_public_key: "pubkey-expired".into(),
            user_id: None,
            meta: meta("laptop"),
            ssh_key: None,
            extra_dns_labels: vec![],
            new_peer: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::PeerLoginExpired));

    let logged_in = manager
        .login_peer(netbird_peer_manager::LoginRequest {
            wireguard_public_key: "pubkey-expired".into(),
            user_id: Some(UserId::from("u1")),
            meta: meta("laptop"),
            ssh_key: None,
            extra_dns_labels: vec![],
            new_peer: None,
        })
        .await
        .expect("login succeeds with matching user");

    assert!(!logged_in.peer.status.login_expired);
}

/// Scenario 5: DNS-label collision on rename.
#[tokio::test]
async fn rename_falls_back_to_ip_suffixed_label_on_collision() {
    let store = MemoryStore::new();
    let account = account_with_network("a1");
    store.seed_account(account.clone());
    store.seed_setup_key(setup_key(&account.id, "ABC123", vec![]));
    store.seed_setup_key(SetupKey {
        id: SetupKeyId::from("k2"),
        hashed_secret: SetupKey::hash_secret("DEF456"),
        ..setup_key(&account.id, "DEF456", vec![])
    });

    let ctx = Context::with_defaults(store, ServerConfig::default());
    let manager = ctx.lifecycle_manager();

    let a = manager
        .add_peer(AddPeerRequest {
            credential: AddPeerCredential::SetupKey("ABC123".into()),
            wireguard_public_key: "pubkey-a".into(),
            meta: meta("laptop"),
            connection_ip: None,
            extra_dns_labels: vec![],
        })
        .await
        .unwrap()
        .peer;

    let b = manager
        .add_peer(AddPeerRequest {
            credential: AddPeerCredential::SetupKey("DEF456".into()),
            wireguard_public_key: "pubkey-b".into(),
            meta: meta("desktop"),
            connection_ip: None,
            extra_dns_labels: vec![],
        })
        .await
        .unwrap()
        .peer;

    let octets = a.ip.octets();
    let expected_suffix = format!("laptop-{}-{}", octets[2], octets[3]);

    let renamed = manager
        .update_peer(
            &account.id,
            &UserId::from("admin"),
            UpdatePeerRequest {
                peer_id: b.id.clone(),
                name: Some("laptop".into()),
                ..Default::default()
            },
        )
        .await
        .expect("rename succeeds");

    assert_eq!(renamed.dns_label, expected_suffix);
    assert_ne!(renamed.dns_label, a.dns_label);
}

struct CountingValidator {
    inner: netbird_peer_manager::DefaultPeerValidator,
    runs: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait]
impl netbird_peer_manager::PeerValidator for CountingValidator {
    async fn validate_peer(
        &self,
        update: &netbird_peer_types::PeerUpdate,
        current: &netbird_peer_types::Peer,
        user_id: Option<&UserId>,
        account_id: &AccountId,
        dns_domain: Option<&str>,
        peer_groups: &[netbird_peer_types::Group],
        extra_settings: &netbird_peer_types::AccountSettings,
    ) -> Result<(netbird_peer_types::Peer, bool), ServerError> {
        self.inner
            .validate_peer(update, current, user_id, account_id, dns_domain, peer_groups, extra_settings)
            .await
    }

    async fn is_not_valid_peer(
        &self,
        account_id: &AccountId,
        peer: &netbird_peer_types::Peer,
        peer_groups: &[netbird_peer_types::Group],
        extra_settings: &netbird_peer_types::AccountSettings,
    ) -> Result<(bool, bool), ServerError> {
        self.inner.is_not_valid_peer(account_id, peer, peer_groups, extra_settings).await
    }

    async fn get_validated_peers(
        &self,
        account_id: &AccountId,
        groups: &[netbird_peer_types::Group],
        peers: &[netbird_peer_types::Peer],
        extra_settings: &netbird_peer_types::AccountSettings,
    ) -> Result<std::collections::HashSet<netbird_peer_types::PeerId>, ServerError> {
        self.runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.get_validated_peers(account_id, groups, peers, extra_settings).await
    }

    async fn prepare_peer(
        &self,
        account_id: &AccountId,
        peer: netbird_peer_types::Peer,
        auto_groups: &[netbird_peer_types::GroupId],
        extra_settings: &netbird_peer_types::AccountSettings,
    ) -> netbird_peer_types::Peer {
        self.inner.prepare_peer(account_id, peer, auto_groups, extra_settings).await
    }

    async fn peer_deleted(&self, account_id: &AccountId, peer_id: &netbird_peer_types::PeerId, extra_settings: &netbird_peer_types::AccountSettings) {
        self.inner.peer_deleted(account_id, peer_id, extra_settings).await
    }
}

/// Scenario 6 / law L2: a burst of coalescing triggers yields at most two
/// broadcast runs, never one per call.
#[tokio::test]
async fn coalescing_burst_runs_at_most_twice() {
    let store = MemoryStore::new();
    let account = account_with_network("a1");
    store.seed_account(account.clone());
    let peer = netbird_peer_types::Peer {
        id: netbird_peer_types::PeerId::from("p1"),
        account_id: account.id.clone(),
        wireguard_public_key: "pubkey-p1".into(),
        meta: meta("laptop"),
        name: "laptop".into(),
        dns_label: "laptop".into(),
        ip: std::net::Ipv4Addr::new(100, 64, 0, 2),
        user_id: None,
        status: netbird_peer_types::PeerStatus::default(),
        ssh_enabled: false,
        ssh_key: None,
        login_expiration_enabled: false,
        inactivity_expiration_enabled: false,
        added_with_sso_login: false,
        ephemeral: false,
        created_at: SystemTime::now(),
        last_login: SystemTime::now(),
        location: netbird_peer_types::Location::default(),
        extra_dns_labels: vec![],
        allow_extra_dns_labels: false,
    };
    store.seed_peer(peer.clone());

    let mut config = ServerConfig::default();
    config.update_account_peers_buffer_interval = Duration::from_millis(50);
    let broadcaster = std::sync::Arc::new(netbird_peer_manager::UpdateBroadcaster::new(store.clone(), config.clone()));
    let _rx = broadcaster.channels().register(peer.id.clone());

    let runs = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let validator: std::sync::Arc<dyn netbird_peer_manager::PeerValidator> = std::sync::Arc::new(CountingValidator {
        inner: netbird_peer_manager::DefaultPeerValidator,
        runs: runs.clone(),
    });
    let proxy: std::sync::Arc<dyn netbird_peer_manager::ProxyController> =
        std::sync::Arc::new(netbird_peer_manager::NoopProxyController);

    for _ in 0..100 {
        broadcaster.buffer_update_account_peers(account.id.clone(), validator.clone(), proxy.clone());
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(runs.load(std::sync::atomic::Ordering::SeqCst) <= 2);
}
