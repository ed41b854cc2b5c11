use netbird_peer_types::{GroupId, Policy, PostureCheckId};
use std::collections::HashSet;

/// Resolves which posture-check bundles apply to a peer via the enabled
/// policies whose source groups contain it. Pure and stateless -- all inputs
/// come from the caller's already-fetched account snapshot.
#[derive(Default)]
pub struct PostureEngine;

impl PostureEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, peer_groups: &HashSet<GroupId>, policies: &[Policy]) -> Vec<PostureCheckId> {
        let mut seen = HashSet::new();
        let mut checks = Vec::new();
        for policy in policies.iter().filter(|p| p.enabled) {
            let referenced = policy
                .rules
                .iter()
                .filter(|rule| rule.enabled)
                .any(|rule| rule.sources.iter().any(|g| peer_groups.contains(g)));
            if !referenced {
                continue;
            }
            for check in &policy.source_posture_checks {
                if seen.insert(check.clone()) {
                    checks.push(check.clone());
                }
            }
        }
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netbird_peer_types::{AccountId, PolicyId, Protocol, Rule, RuleAction};

    fn policy(sources: Vec<GroupId>, checks: Vec<PostureCheckId>) -> Policy {
        Policy {
            id: PolicyId::from("pol1"),
            account_id: AccountId::from("a1"),
            enabled: true,
            rules: vec![Rule {
                enabled: true,
                sources,
                destinations: vec![GroupId::from("dst")],
                ports: vec![],
                protocol: Protocol::All,
                action: RuleAction::Accept,
            }],
            source_posture_checks: checks,
        }
    }

    #[test]
    fn resolves_checks_for_matching_source_group() {
        let engine = PostureEngine::new();
        let group = GroupId::from("g1");
        let check = PostureCheckId("min-os-version".into());
        let policies = vec![policy(vec![group.clone()], vec![check.clone()])];

        let mut peer_groups = HashSet::new();
        peer_groups.insert(group);

        let resolved = engine.resolve(&peer_groups, &policies);
        assert_eq!(resolved, vec![check]);
    }

    #[test]
    fn disabled_policy_contributes_nothing() {
        let engine = PostureEngine::new();
        let group = GroupId::from("g1");
        let mut p = policy(vec![group.clone()], vec![PostureCheckId("x".into())]);
        p.enabled = false;

        let mut peer_groups = HashSet::new();
        peer_groups.insert(group);

        assert!(engine.resolve(&peer_groups, &[p]).is_empty());
    }

    #[test]
    fn dedups_checks_across_policies() {
        let engine = PostureEngine::new();
        let group = GroupId::from("g1");
        let check = PostureCheckId("shared-check".into());
        let policies = vec![
            policy(vec![group.clone()], vec![check.clone()]),
            policy(vec![group.clone()], vec![check.clone()]),
        ];

        let mut peer_groups = HashSet::new();
        peer_groups.insert(group);

        assert_eq!(engine.resolve(&peer_groups, &policies), vec![check]);
    }
}
