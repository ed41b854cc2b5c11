use async_trait::async_trait;
use netbird_peer_types::Location;
use std::net::IpAddr;

/// Resolves a connection IP to a coarse geolocation. Failures are
/// warn-and-continue everywhere this is called -- they never fail the
/// enclosing lifecycle operation.
#[async_trait]
pub trait GeolocationResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> Option<Location>;
}

/// No geolocation database wired in; always returns `None`.
pub struct NoopGeolocationResolver;

#[async_trait]
impl GeolocationResolver for NoopGeolocationResolver {
    async fn resolve(&self, _ip: IpAddr) -> Option<Location> {
        None
    }
}
