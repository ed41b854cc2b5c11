use async_trait::async_trait;
use netbird_peer_types::{PeerId, ProxyNetworkMap};

/// External ingress-proxy integration. `is_bound` backs `DeletePeer`'s
/// rejection of peers still bound to ingress-proxy ports; `overlay_for`
/// supplies the per-peer overlay merged last into a `NetworkMap`.
#[async_trait]
pub trait ProxyController: Send + Sync {
    async fn is_bound(&self, peer_id: &PeerId) -> bool;
    async fn overlay_for(&self, peer_id: &PeerId) -> Option<ProxyNetworkMap>;
}

pub struct NoopProxyController;

#[async_trait]
impl ProxyController for NoopProxyController {
    async fn is_bound(&self, _peer_id: &PeerId) -> bool {
        false
    }

    async fn overlay_for(&self, _peer_id: &PeerId) -> Option<ProxyNetworkMap> {
        None
    }
}
