use crate::{AccountId, GroupId, SetupKeyId};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SetupKeyError {
    #[error("setup key has been revoked")]
    Revoked,
    #[error("setup key has expired")]
    Expired,
    #[error("setup key has reached its usage limit")]
    UsageLimitReached,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetupKey {
    pub id: SetupKeyId,
    pub account_id: AccountId,
    pub name: String,
    /// base64(sha256(upper(plaintext secret))).
    pub hashed_secret: String,
    pub auto_groups: Vec<GroupId>,
    pub ephemeral: bool,
    pub allow_extra_dns_labels: bool,
    pub revoked: bool,
    pub expires_at: Option<SystemTime>,
    pub usage_limit: Option<u32>,
    pub used_times: u32,
}

impl SetupKey {
    /// `hash = base64(sha256(upper(key)))`, as consumed by the store when looking
    /// a plaintext setup key secret up by its stored hash.
    pub fn hash_secret(plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(plaintext.to_uppercase().as_bytes());
        STANDARD.encode(hasher.finalize())
    }

    pub fn is_valid(&self, now: SystemTime) -> Result<(), SetupKeyError> {
        if self.revoked {
            return Err(SetupKeyError::Revoked);
        }
        if matches!(self.expires_at, Some(expiry) if expiry <= now) {
            return Err(SetupKeyError::Expired);
        }
        if matches!(self.usage_limit, Some(limit) if self.used_times >= limit) {
            return Err(SetupKeyError::UsageLimitReached);
        }
        Ok(())
    }
}
