use async_trait::async_trait;
use netbird_peer_types::UserId;

/// The one call the Lifecycle Manager makes against the identity provider:
/// resolving a user's email for the iPhone/iPad hostname rewrite heuristic.
/// Best-effort -- failure leaves the hostname unchanged.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    async fn get_user_email(&self, user_id: &UserId) -> Option<String>;
}

pub struct NoopIdentityProviderClient;

#[async_trait]
impl IdentityProviderClient for NoopIdentityProviderClient {
    async fn get_user_email(&self, _user_id: &UserId) -> Option<String> {
        None
    }
}
