use crate::{AccountId, AccountSettings, PeerId, UserId};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::SystemTime;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerMeta {
    pub hostname: String,
    pub go_os: String,
    pub kernel: String,
    pub core: String,
    pub platform: String,
    pub os: String,
    pub wt_version: String,
    pub ui_version: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub connection_ip: Option<IpAddr>,
    pub country_code: String,
    pub city_name: String,
    pub geoname_id: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerStatus {
    pub connected: bool,
    pub last_seen: SystemTime,
    pub login_expired: bool,
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self {
            connected: false,
            last_seen: SystemTime::UNIX_EPOCH,
            login_expired: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub account_id: AccountId,
    pub wireguard_public_key: String,
    pub meta: PeerMeta,
    pub name: String,
    pub dns_label: String,
    pub ip: Ipv4Addr,
    pub user_id: Option<UserId>,
    pub status: PeerStatus,
    pub ssh_enabled: bool,
    pub ssh_key: Option<String>,
    pub login_expiration_enabled: bool,
    pub inactivity_expiration_enabled: bool,
    pub added_with_sso_login: bool,
    pub ephemeral: bool,
    pub created_at: SystemTime,
    pub last_login: SystemTime,
    pub location: Location,
    pub extra_dns_labels: Vec<String>,
    pub allow_extra_dns_labels: bool,
}

impl Peer {
    /// A peer whose registration was authenticated by a user identity is
    /// subject to login/inactivity expiration; setup-key peers are not.
    pub fn is_sso_peer(&self) -> bool {
        self.added_with_sso_login
    }

    /// True once `Status.LoginExpired` has fired and the settings that would
    /// make it meaningful are enabled for this peer, both at the per-peer
    /// level and the account-wide master toggle.
    pub fn login_expired(&self, settings: &AccountSettings, now: SystemTime) -> bool {
        if !self.added_with_sso_login || !self.login_expiration_enabled || !settings.login_expiration_enabled {
            return false;
        }
        if self.status.login_expired {
            return true;
        }
        now.duration_since(self.last_login)
            .map(|elapsed| elapsed >= settings.login_expiration)
            .unwrap_or(false)
    }

    /// True once the peer has been disconnected longer than the inactivity
    /// window; only meaningful for SSO peers with both the per-peer setting
    /// and the account-wide master toggle enabled.
    pub fn session_expired(&self, settings: &AccountSettings, now: SystemTime) -> bool {
        if !self.added_with_sso_login || !self.inactivity_expiration_enabled || !settings.inactivity_expiration_enabled {
            return false;
        }
        if self.status.connected || self.status.login_expired {
            return false;
        }
        now.duration_since(self.status.last_seen)
            .map(|elapsed| elapsed >= settings.inactivity_expiration)
            .unwrap_or(false)
    }
}

/// The subset of a peer that a client may propose changing via Login/Sync/Update.
/// Distinct from `Peer` itself because the incoming values must be validated and
/// merged field-by-field rather than overwriting the stored record wholesale.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PeerUpdate {
    pub meta: Option<PeerMeta>,
    pub ssh_key: Option<String>,
    pub extra_dns_labels: Vec<String>,
}

impl PeerMeta {
    /// Merges `new` into `self`, returning whether anything actually changed.
    /// Mirrors `UpdateMetaIfNew`: empty incoming fields never overwrite existing ones.
    pub fn update_if_new(&mut self, new: &PeerMeta) -> bool {
        let mut changed = false;
        macro_rules! merge {
            ($field:ident) => {
                if !new.$field.is_empty() && self.$field != new.$field {
                    self.$field = new.$field.clone();
                    changed = true;
                }
            };
        }
        merge!(hostname);
        merge!(go_os);
        merge!(kernel);
        merge!(core);
        merge!(platform);
        merge!(os);
        merge!(wt_version);
        merge!(ui_version);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_merge_ignores_empty_fields() {
        let mut current = PeerMeta {
            hostname: "laptop".into(),
            ..Default::default()
        };
        let incoming = PeerMeta::default();
        assert!(!current.update_if_new(&incoming));
        assert_eq!(current.hostname, "laptop");
    }

    #[test]
    fn meta_merge_applies_changed_fields() {
        let mut current = PeerMeta {
            hostname: "laptop".into(),
            ..Default::default()
        };
        let incoming = PeerMeta {
            hostname: "laptop-2".into(),
            ..Default::default()
        };
        assert!(current.update_if_new(&incoming));
        assert_eq!(current.hostname, "laptop-2");
    }
}
