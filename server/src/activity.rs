use async_trait::async_trait;
use netbird_peer_types::{AccountId, PeerId, UserId};
use serde::Serialize;

/// The activity kinds the Lifecycle Manager emits. Mirrors §6's event list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEvent {
    PeerAddedByUser,
    PeerAddedWithSetupKey,
    PeerRenamed,
    PeerSshEnabled,
    PeerSshDisabled,
    PeerLoginExpirationEnabled,
    PeerLoginExpirationDisabled,
    PeerInactivityExpirationEnabled,
    PeerInactivityExpirationDisabled,
    PeerRemovedByUser,
    UserLoggedInPeer,
}

/// `StoreEvent`. Failures here are swallowed by callers (logged at `warn`)
/// per the error-handling design -- activity logging never fails the
/// enclosing lifecycle operation.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn store_event(
        &self,
        initiator_id: Option<&UserId>,
        target_id: &PeerId,
        account_id: &AccountId,
        event: ActivityEvent,
        meta: serde_json::Value,
    );
}

pub struct NoopActivityLog;

#[async_trait]
impl ActivityLog for NoopActivityLog {
    async fn store_event(
        &self,
        _initiator_id: Option<&UserId>,
        _target_id: &PeerId,
        _account_id: &AccountId,
        event: ActivityEvent,
        _meta: serde_json::Value,
    ) {
        log::debug!("activity event {:?} (no-op sink)", event);
    }
}
