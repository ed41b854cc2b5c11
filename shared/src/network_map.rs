use crate::policy::{Protocol, RuleAction};
use crate::{NetworkRouter, Peer, PostureCheckId};
use serde::{Deserialize, Serialize};

/// The subset of a `Peer` that is disseminated to other peers -- never the
/// full record (no SSH key, no raw location).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    pub wireguard_public_key: String,
    pub ip: std::net::Ipv4Addr,
    pub dns_label: String,
    pub allow_extra_dns_labels: bool,
}

impl From<&Peer> for PeerConfig {
    fn from(peer: &Peer) -> Self {
        Self {
            wireguard_public_key: peer.wireguard_public_key.clone(),
            ip: peer.ip,
            dns_label: peer.dns_label.clone(),
            allow_extra_dns_labels: peer.allow_extra_dns_labels,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FirewallRule {
    pub peer_ip: std::net::Ipv4Addr,
    pub ports: Vec<u16>,
    pub protocol: Protocol,
    pub action: RuleAction,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    pub domain: Option<String>,
    pub custom_zone_records: Vec<(String, std::net::Ipv4Addr)>,
}

/// A per-peer materialized view of the mesh: everything that peer's client
/// needs to reconfigure its local WireGuard interface and firewall.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkMap {
    pub serial: u64,
    pub peer_config: PeerConfig,
    pub remote_peers: Vec<PeerConfig>,
    /// Sent as `true` on deletion: instructs the peer to drop all remote peers.
    pub remote_peers_is_empty: bool,
    pub firewall_rules: Vec<FirewallRule>,
    pub routes: Vec<NetworkRouter>,
    pub dns_config: DnsConfig,
    pub posture_checks: Vec<PostureCheckId>,
}

impl NetworkMap {
    /// The minimal map sent to a peer still pending approval: account network
    /// only, no visibility into other peers.
    pub fn pending_approval(serial: u64, peer_config: PeerConfig) -> Self {
        Self {
            serial,
            peer_config,
            remote_peers: Vec::new(),
            remote_peers_is_empty: true,
            firewall_rules: Vec::new(),
            routes: Vec::new(),
            dns_config: DnsConfig::default(),
            posture_checks: Vec::new(),
        }
    }

    /// Merges an externally-supplied proxy overlay into this map: union
    /// semantics everywhere, with the proxy's remote-peer entries winning on a
    /// `wireguard_public_key` collision, and firewall rules deduplicated by
    /// `(peer_ip, ports, protocol, action)`.
    pub fn merge_proxy_overlay(&mut self, overlay: &ProxyNetworkMap) {
        for proxy_peer in &overlay.remote_peers {
            if let Some(existing) = self
                .remote_peers
                .iter_mut()
                .find(|p| p.wireguard_public_key == proxy_peer.wireguard_public_key)
            {
                *existing = proxy_peer.clone();
            } else {
                self.remote_peers.push(proxy_peer.clone());
            }
        }
        if !overlay.remote_peers.is_empty() {
            self.remote_peers_is_empty = false;
        }

        for rule in &overlay.firewall_rules {
            let dup = self.firewall_rules.iter().any(|existing| {
                existing.peer_ip == rule.peer_ip
                    && existing.ports == rule.ports
                    && existing.protocol == rule.protocol
                    && existing.action == rule.action
            });
            if !dup {
                self.firewall_rules.push(rule.clone());
            }
        }
    }
}

/// An externally computed per-peer overlay (e.g. from an ingress proxy
/// controller) merged into the network map last, union semantics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxyNetworkMap {
    pub remote_peers: Vec<PeerConfig>,
    pub firewall_rules: Vec<FirewallRule>,
}

/// The wire message sent on a peer's push channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub network_map: NetworkMap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn base_map() -> NetworkMap {
        NetworkMap::pending_approval(
            1,
            PeerConfig {
                wireguard_public_key: "self".into(),
                ip: Ipv4Addr::new(100, 64, 0, 1),
                dns_label: "self".into(),
                allow_extra_dns_labels: false,
            },
        )
    }

    #[test]
    fn proxy_overlay_wins_on_key_collision() {
        let mut map = base_map();
        map.remote_peers.push(PeerConfig {
            wireguard_public_key: "peerA".into(),
            ip: Ipv4Addr::new(100, 64, 0, 2),
            dns_label: "a".into(),
            allow_extra_dns_labels: false,
        });

        let overlay = ProxyNetworkMap {
            remote_peers: vec![PeerConfig {
                wireguard_public_key: "peerA".into(),
                ip: Ipv4Addr::new(100, 64, 0, 99),
                dns_label: "a-proxied".into(),
                allow_extra_dns_labels: false,
            }],
            firewall_rules: vec![],
        };
        map.merge_proxy_overlay(&overlay);

        assert_eq!(map.remote_peers.len(), 1);
        assert_eq!(map.remote_peers[0].dns_label, "a-proxied");
    }

    #[test]
    fn firewall_rule_union_dedups() {
        let mut map = base_map();
        let rule = FirewallRule {
            peer_ip: Ipv4Addr::new(100, 64, 0, 2),
            ports: vec![22],
            protocol: Protocol::Tcp,
            action: RuleAction::Accept,
        };
        map.firewall_rules.push(rule.clone());

        let overlay = ProxyNetworkMap {
            remote_peers: vec![],
            firewall_rules: vec![rule],
        };
        map.merge_proxy_overlay(&overlay);
        assert_eq!(map.firewall_rules.len(), 1);
    }
}
