use crate::{AccountId, GroupId, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub account_id: AccountId,
    pub name: String,
    pub peers: HashSet<PeerId>,
}

impl Group {
    pub fn new(id: GroupId, account_id: AccountId, name: impl Into<String>) -> Self {
        Self {
            id,
            account_id,
            name: name.into(),
            peers: HashSet::new(),
        }
    }
}
