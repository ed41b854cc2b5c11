use thiserror::Error;

/// The taxonomy of failures a lifecycle operation can return. Callers one
/// layer up (gRPC/REST, out of scope here) map these to transport status
/// codes; `PeerLoginExpired`, `PeerNotRegistered`, and `PreconditionFailed`
/// are the ones clients are expected to handle specially.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("unauthenticated request")]
    Unauthenticated,

    #[error("permission denied")]
    PermissionDenied,

    #[error("permission validation failed: {0}")]
    PermissionValidationError(String),

    #[error("not found")]
    NotFound,

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("peer is not registered")]
    PeerNotRegistered,

    #[error("peer login has expired")]
    PeerLoginExpired,

    #[error("peer login does not match the attached user")]
    PeerLoginMismatch,

    #[error("peer does not belong to this account")]
    PeerNotPartOfAccount,

    /// Retryable: a unique-constraint collision (IP/DNS label) under
    /// concurrent allocation. Callers retry a bounded number of times;
    /// this should never escape the allocator to outside callers.
    #[error("unique constraint violated")]
    UniqueConstraint,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

impl ServerError {
    /// True for the one error kind the allocator is expected to retry on.
    pub fn is_unique_constraint(&self) -> bool {
        matches!(self, ServerError::UniqueConstraint)
            || matches!(self, ServerError::Store(crate::store::StoreError::UniqueConstraint))
    }
}
