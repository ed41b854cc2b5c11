use crate::{AccountId, PeerId, RouteId};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// A peer acting as a gateway/router for an external network range.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkRouter {
    pub id: RouteId,
    pub account_id: AccountId,
    pub peer: PeerId,
    pub network: IpNet,
    pub masquerade: bool,
}
