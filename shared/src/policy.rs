use crate::{AccountId, GroupId, PolicyId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureCheckId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Accept,
    Drop,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub enabled: bool,
    pub sources: Vec<GroupId>,
    pub destinations: Vec<GroupId>,
    pub ports: Vec<u16>,
    pub protocol: Protocol,
    pub action: RuleAction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub account_id: AccountId,
    pub enabled: bool,
    pub rules: Vec<Rule>,
    pub source_posture_checks: Vec<PostureCheckId>,
}

impl Policy {
    /// Groups referenced as a source or destination by this policy's enabled
    /// rules. A disabled rule contributes no active groups even if its parent
    /// policy is enabled. Used to decide whether a group is "active" for
    /// broadcast-trigger purposes.
    pub fn referenced_groups(&self) -> impl Iterator<Item = &GroupId> {
        self.rules
            .iter()
            .filter(|rule| rule.enabled)
            .flat_map(|rule| rule.sources.iter().chain(rule.destinations.iter()))
    }
}
