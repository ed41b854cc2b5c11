use crate::error::ServerError;
use async_trait::async_trait;
use netbird_peer_types::{AccountId, UserId};

/// Resource a permission check applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Module {
    Peers,
    Groups,
    Policies,
    Routes,
    SetupKeys,
    Settings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Update,
    Delete,
}

/// `ValidateUserPermissions`. A validation failure (user not found, account
/// mismatch) is distinct from a plain denial -- the former is
/// `PermissionValidationError`, the latter `Ok(false)`.
#[async_trait]
pub trait PermissionValidator: Send + Sync {
    async fn validate_user_permissions(
        &self,
        account_id: &AccountId,
        user_id: &UserId,
        module: Module,
        operation: Operation,
    ) -> Result<bool, ServerError>;
}

/// Grants every operation to every user. Suitable for tests and for
/// embedding until the surrounding service wires in its own RBAC.
pub struct DefaultPermissionValidator;

#[async_trait]
impl PermissionValidator for DefaultPermissionValidator {
    async fn validate_user_permissions(
        &self,
        _account_id: &AccountId,
        _user_id: &UserId,
        _module: Module,
        _operation: Operation,
    ) -> Result<bool, ServerError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_validator_allows_everything() {
        let validator = DefaultPermissionValidator;
        let allowed = validator
            .validate_user_permissions(&AccountId::from("a1"), &UserId::from("u1"), Module::Peers, Operation::Delete)
            .await
            .unwrap();
        assert!(allowed);
    }
}
