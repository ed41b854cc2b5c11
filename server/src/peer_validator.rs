use crate::error::ServerError;
use async_trait::async_trait;
use netbird_peer_types::{AccountId, AccountSettings, Group, GroupId, Peer, PeerId, PeerUpdate, UserId};
use std::collections::HashSet;

/// Pluggable policy that classifies peers and decides what a proposed update
/// actually changes. The default implementation below is deliberately
/// permissive; a real deployment swaps in one that consults posture checks,
/// admin-approval settings, etc.
#[async_trait]
pub trait PeerValidator: Send + Sync {
    /// May normalize or deny a proposed update. Returns the effective peer
    /// record and whether the change requires a network-map recompute.
    async fn validate_peer(
        &self,
        update: &PeerUpdate,
        current: &Peer,
        user_id: Option<&UserId>,
        account_id: &AccountId,
        dns_domain: Option<&str>,
        peer_groups: &[Group],
        extra_settings: &AccountSettings,
    ) -> Result<(Peer, bool), ServerError>;

    /// Decides whether the peer should currently be blocked (e.g. pending
    /// approval). Returns `(not_valid, status_changed)`.
    async fn is_not_valid_peer(
        &self,
        account_id: &AccountId,
        peer: &Peer,
        peer_groups: &[Group],
        extra_settings: &AccountSettings,
    ) -> Result<(bool, bool), ServerError>;

    /// The authoritative approved set used when building network maps.
    async fn get_validated_peers(
        &self,
        account_id: &AccountId,
        groups: &[Group],
        peers: &[Peer],
        extra_settings: &AccountSettings,
    ) -> Result<HashSet<PeerId>, ServerError>;

    /// Lets the validator stamp fields at registration time.
    async fn prepare_peer(
        &self,
        account_id: &AccountId,
        peer: Peer,
        auto_groups: &[GroupId],
        extra_settings: &AccountSettings,
    ) -> Peer;

    /// Notification hook, fire-and-forget.
    async fn peer_deleted(&self, account_id: &AccountId, peer_id: &PeerId, extra_settings: &AccountSettings);
}

/// Admits every peer unconditionally except ones already marked
/// login-expired. `validate_peer` merges `Meta`/`SSHKey` the same way
/// `LoginPeer`/`SyncPeer` do; `prepare_peer` is a no-op beyond what `AddPeer`
/// has already stamped.
pub struct DefaultPeerValidator;

#[async_trait]
impl PeerValidator for DefaultPeerValidator {
    async fn validate_peer(
        &self,
        update: &PeerUpdate,
        current: &Peer,
        _user_id: Option<&UserId>,
        _account_id: &AccountId,
        _dns_domain: Option<&str>,
        _peer_groups: &[Group],
        _extra_settings: &AccountSettings,
    ) -> Result<(Peer, bool), ServerError> {
        let mut effective = current.clone();
        let mut changed = false;

        if let Some(meta) = &update.meta {
            if effective.meta.update_if_new(meta) {
                changed = true;
            }
        }
        if update.extra_dns_labels != effective.extra_dns_labels {
            effective.extra_dns_labels = update.extra_dns_labels.clone();
            changed = true;
        }

        Ok((effective, changed))
    }

    async fn is_not_valid_peer(
        &self,
        _account_id: &AccountId,
        peer: &Peer,
        _peer_groups: &[Group],
        _extra_settings: &AccountSettings,
    ) -> Result<(bool, bool), ServerError> {
        Ok((peer.status.login_expired, false))
    }

    async fn get_validated_peers(
        &self,
        _account_id: &AccountId,
        _groups: &[Group],
        peers: &[Peer],
        _extra_settings: &AccountSettings,
    ) -> Result<HashSet<PeerId>, ServerError> {
        Ok(peers
            .iter()
            .filter(|p| !p.status.login_expired)
            .map(|p| p.id.clone())
            .collect())
    }

    async fn prepare_peer(
        &self,
        _account_id: &AccountId,
        peer: Peer,
        _auto_groups: &[GroupId],
        _extra_settings: &AccountSettings,
    ) -> Peer {
        peer
    }

    async fn peer_deleted(&self, _account_id: &AccountId, _peer_id: &PeerId, _extra_settings: &AccountSettings) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbird_peer_types::{Location, PeerMeta, PeerStatus};
    use std::net::Ipv4Addr;
    use std::time::SystemTime;

    fn peer() -> Peer {
        Peer {
            id: PeerId::from("p1"),
            account_id: AccountId::from("a1"),
            wireguard_public_key: "k1".into(),
            meta: PeerMeta::default(),
            name: "laptop".into(),
            dns_label: "laptop".into(),
            ip: Ipv4Addr::new(100, 64, 0, 2),
            user_id: None,
            status: PeerStatus::default(),
            ssh_enabled: false,
            ssh_key: None,
            login_expiration_enabled: false,
            inactivity_expiration_enabled: false,
            added_with_sso_login: false,
            ephemeral: false,
            created_at: SystemTime::now(),
            last_login: SystemTime::now(),
            location: Location::default(),
            extra_dns_labels: vec![],
            allow_extra_dns_labels: false,
        }
    }

    #[tokio::test]
    async fn login_expired_peer_is_not_valid() {
        let validator = DefaultPeerValidator;
        let mut p = peer();
        p.status.login_expired = true;
        let (not_valid, _) = validator
            .is_not_valid_peer(&p.account_id.clone(), &p, &[], &AccountSettings::default())
            .await
            .unwrap();
        assert!(not_valid);
    }

    #[tokio::test]
    async fn validate_peer_reports_no_change_on_empty_update() {
        let validator = DefaultPeerValidator;
        let current = peer();
        let (effective, changed) = validator
            .validate_peer(
                &PeerUpdate::default(),
                &current,
                None,
                &current.account_id.clone(),
                None,
                &[],
                &AccountSettings::default(),
            )
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(effective.name, current.name);
    }
}
