use crate::auth::AuthError;
use webhook_events::StoreError;

/// Crate-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Every authentication failure. The inner reason is for logs; callers
    /// outside the crate should only surface a generic 401.
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transient failure of one delivery attempt.
    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for WebhookError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => WebhookError::NotFound(what),
            StoreError::Conflict(what) => WebhookError::Conflict(what),
            StoreError::InvalidState(what) => WebhookError::InvalidState(what),
            StoreError::Backend(what) => WebhookError::Storage(what),
        }
    }
}
