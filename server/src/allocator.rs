use crate::store::{StoreError, StoreGateway};
use ipnet::Ipv4Net;
use netbird_peer_types::{parse_domain_label, AccountId};
use rand::Rng;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocationError {
    /// All `retry_budget` attempts collided on a unique constraint.
    #[error("exhausted {0} allocation attempts")]
    Exhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `AllocateRandomPeerIP` + `GetParsedDomainLabel`, retried together as one
/// unit since both are reserved by the same store insert.
pub struct PeerAllocator {
    retry_budget: usize,
}

impl PeerAllocator {
    pub fn new(retry_budget: usize) -> Self {
        Self { retry_budget }
    }

    /// Uniformly random host address within `cidr`, excluding the network
    /// and broadcast addresses.
    fn random_ip(cidr: &Ipv4Net) -> Ipv4Addr {
        let network = u32::from(cidr.network());
        let broadcast = u32::from(cidr.broadcast());
        let usable_span = broadcast.saturating_sub(network).saturating_sub(1).max(1);
        let offset = rand::thread_rng().gen_range(1..=usable_span);
        Ipv4Addr::from(network + offset)
    }

    /// Normalizes `hostname` into a DNS label. From the second attempt
    /// onward (i.e. after a collision), falls back to
    /// `<label>-<ip.octet3>-<ip.octet4>` as the spec's collision fallback.
    fn label_candidate(hostname: &str, ip: Ipv4Addr, use_fallback: bool) -> String {
        let base = parse_domain_label(hostname).unwrap_or_else(|_| "peer".to_string());
        if use_fallback {
            let octets = ip.octets();
            format!("{}-{}-{}", base, octets[2], octets[3])
        } else {
            base
        }
    }

    /// Retries up to `retry_budget` times, generating a fresh (IP, label)
    /// pair each attempt. Fails with `Exhausted` once the budget runs out --
    /// callers surface that as `ServerError::Internal`.
    pub async fn allocate<S: StoreGateway>(
        &self,
        store: &S,
        account_id: &AccountId,
        cidr: &Ipv4Net,
        hostname: &str,
    ) -> Result<(Ipv4Addr, String), AllocationError> {
        for attempt in 0..self.retry_budget {
            let ip = Self::random_ip(cidr);
            let label = Self::label_candidate(hostname, ip, attempt > 0);

            if store.ip_in_use(account_id, ip).await? {
                continue;
            }
            if store.dns_label_in_use(account_id, &label).await? {
                continue;
            }
            return Ok((ip, label));
        }
        Err(AllocationError::Exhausted(self.retry_budget))
    }
}
