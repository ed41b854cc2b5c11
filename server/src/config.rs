use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::time::Duration;

/// The account-wide policy knobs, loadable from TOML the way the reference
/// server's `ConfigFile` is. These seed `AccountSettings` for newly created
/// accounts and bound the broadcaster/allocator's internal behavior.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    pub default_login_expiration: Duration,
    pub default_inactivity_expiration: Duration,

    /// `updateAccountPeersBufferInterval` -- the coalescing scheduler's
    /// follow-up delay after a broadcast that absorbed a pending update.
    pub update_account_peers_buffer_interval: Duration,

    /// Global bound on concurrent per-peer map builds within one
    /// account-broadcast.
    pub broadcaster_concurrency: usize,

    /// Max attempts the IP/DNS-label allocator retries a unique-constraint
    /// collision before failing with `Internal`.
    pub allocator_retry_budget: usize,

    /// Backoff the expiration schedulers use after a store failure.
    pub scheduler_retry_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_login_expiration: Duration::from_secs(24 * 60 * 60),
            default_inactivity_expiration: Duration::from_secs(10 * 60),
            update_account_peers_buffer_interval: Duration::from_millis(500),
            broadcaster_concurrency: 10,
            allocator_retry_budget: 10,
            scheduler_retry_interval: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        let toml = toml::to_string(self).expect("ServerConfig is always serializable");
        file.write_all(toml.as_bytes())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
