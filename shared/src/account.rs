use crate::AccountId;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// The account's internal WireGuard-style address space, plus the allocator's
/// bookkeeping: the running serial counter and the last IP handed out (used
/// only as a starting point for the allocator's random search, never as a
/// source of truth for uniqueness -- uniqueness is enforced by the store).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Network {
    pub cidr: Ipv4Net,
    pub serial: u64,
    pub last_allocated_ip: Option<Ipv4Addr>,
}

impl Network {
    pub fn new(cidr: Ipv4Net) -> Self {
        Self {
            cidr,
            serial: 0,
            last_allocated_ip: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountSettings {
    pub login_expiration_enabled: bool,
    pub login_expiration: Duration,
    pub inactivity_expiration_enabled: bool,
    pub inactivity_expiration: Duration,
    pub regular_users_view_blocked: bool,
    pub dns_domain: Option<String>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            login_expiration_enabled: false,
            login_expiration: Duration::from_secs(24 * 60 * 60),
            inactivity_expiration_enabled: false,
            inactivity_expiration: Duration::from_secs(10 * 60),
            regular_users_view_blocked: false,
            dns_domain: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub network: Network,
    pub settings: AccountSettings,
}

impl Account {
    pub fn new(id: AccountId, cidr: Ipv4Net) -> Self {
        Self {
            id,
            network: Network::new(cidr),
            settings: AccountSettings::default(),
        }
    }
}
