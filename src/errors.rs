use sea_orm::error::DbErr;
use uuid::Uuid;

/// Error taxonomy shared by every service in the crate.
///
/// Validation errors (`InvalidQuantity`, `ItemNotFound`, `EmptyCart`) are
/// reported straight back to the caller and never reach the payment provider.
/// `GatewayUnavailable` is transient and safe to retry for `begin_checkout`;
/// once a capture has succeeded the orchestrator retries conversion against
/// the existing session instead of surfacing the failure.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i32),

    #[error("item {0} not found in cart")]
    ItemNotFound(Uuid),

    #[error("cart is empty")]
    EmptyCart,

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("token invalid")]
    TokenInvalid,

    #[error("token expired")]
    TokenExpired,

    #[error("checkout session {0} awaiting reconciliation")]
    CheckoutInProgress(Uuid),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl ServiceError {
    /// Whether the caller may safely retry the failed operation as-is.
    ///
    /// Only transient gateway outages qualify; everything else either already
    /// took effect or will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::Database(_))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal(anyhow::anyhow!(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_outage_is_retryable() {
        assert!(ServiceError::GatewayUnavailable("timeout".into()).is_retryable());
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!ServiceError::EmptyCart.is_retryable());
        assert!(!ServiceError::InvalidQuantity(-1).is_retryable());
        assert!(!ServiceError::TokenExpired.is_retryable());
    }

    #[test]
    fn validator_errors_map_to_validation() {
        use validator::Validate;

        #[derive(Validate)]
        struct Probe {
            #[validate(email)]
            email: String,
        }

        let err = Probe {
            email: "not-an-email".into(),
        }
        .validate()
        .unwrap_err();
        assert!(matches!(ServiceError::from(err), ServiceError::Validation(_)));
    }
}
