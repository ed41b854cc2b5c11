//! The per-peer network map builder (distinct from the wire types in
//! `netbird_peer_types::network_map`, which this module assembles).

use crate::posture::PostureEngine;
use netbird_peer_types::{
    Account, DnsConfig, FirewallRule, GroupId, NetworkMap, NetworkRouter, Peer, PeerConfig, PeerId,
    Policy,
};
use std::collections::{HashMap, HashSet};

/// Pure function from an account snapshot plus the pre-computed approved set
/// to a single peer's `NetworkMap`. Holds no state of its own; every input
/// the visibility rule needs is passed in by the caller (the Lifecycle
/// Manager or the Broadcaster), which is what keeps it safe to call from
/// many concurrent workers without synchronization.
#[derive(Default)]
pub struct NetworkMapBuilder;

impl NetworkMapBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Visibility rule: peer B is visible to peer A iff there is an enabled
    /// policy with an enabled rule where (A's groups intersect Sources and
    /// B's groups intersect Destinations) or the symmetric direction, and
    /// both A and B are in the approved set. Rules compose by union;
    /// firewall-rule entries are deduped by (peer_ip, ports, protocol,
    /// action) once projected onto the target peer's perspective.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        account: &Account,
        target: &Peer,
        peers: &[Peer],
        peer_group_ids: &HashMap<PeerId, HashSet<GroupId>>,
        approved: &HashSet<PeerId>,
        policies: &[Policy],
        routers: &[NetworkRouter],
        dns_domain: Option<&str>,
        posture: &PostureEngine,
    ) -> NetworkMap {
        let empty = HashSet::new();
        let my_groups = peer_group_ids.get(&target.id).unwrap_or(&empty);

        let mut visible_ids = HashSet::new();
        let mut firewall_rules: Vec<FirewallRule> = Vec::new();

        if approved.contains(&target.id) {
            for policy in policies.iter().filter(|p| p.enabled) {
                for rule in policy.rules.iter().filter(|r| r.enabled) {
                    let i_am_source = rule.sources.iter().any(|g| my_groups.contains(g));
                    let i_am_dest = rule.destinations.iter().any(|g| my_groups.contains(g));
                    if !i_am_source && !i_am_dest {
                        continue;
                    }
                    for other in peers {
                        if other.id == target.id || !approved.contains(&other.id) {
                            continue;
                        }
                        let other_groups = peer_group_ids.get(&other.id).unwrap_or(&empty);
                        let forward = i_am_source && rule.destinations.iter().any(|g| other_groups.contains(g));
                        let backward = i_am_dest && rule.sources.iter().any(|g| other_groups.contains(g));
                        if !forward && !backward {
                            continue;
                        }
                        visible_ids.insert(other.id.clone());
                        push_rule_deduped(
                            &mut firewall_rules,
                            FirewallRule {
                                peer_ip: other.ip,
                                ports: rule.ports.clone(),
                                protocol: rule.protocol,
                                action: rule.action,
                            },
                        );
                    }
                }
            }
        }

        let remote_peers: Vec<PeerConfig> = peers
            .iter()
            .filter(|p| visible_ids.contains(&p.id))
            .map(PeerConfig::from)
            .collect();
        let remote_peers_is_empty = remote_peers.is_empty();

        let routes = routers
            .iter()
            .filter(|r| r.account_id == account.id)
            .cloned()
            .collect();

        let posture_checks = posture.resolve(my_groups, policies);

        NetworkMap {
            serial: account.network.serial,
            peer_config: PeerConfig::from(target),
            remote_peers,
            remote_peers_is_empty,
            firewall_rules,
            routes,
            dns_config: DnsConfig {
                domain: dns_domain.map(String::from),
                custom_zone_records: Vec::new(),
            },
            posture_checks,
        }
    }
}

fn push_rule_deduped(rules: &mut Vec<FirewallRule>, candidate: FirewallRule) {
    let mut candidate_ports = candidate.ports.clone();
    candidate_ports.sort_unstable();
    let already_present = rules.iter().any(|existing| {
        let mut existing_ports = existing.ports.clone();
        existing_ports.sort_unstable();
        existing.peer_ip == candidate.peer_ip
            && existing_ports == candidate_ports
            && existing.protocol == candidate.protocol
            && existing.action == candidate.action
    });
    if !already_present {
        rules.push(candidate);
    }
}
