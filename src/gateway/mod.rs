use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

pub mod paypal;

pub use paypal::PayPalProvider;

/// An authorization created at the provider. The shopper approves the
/// payment at `approval_url`; `id` is the correlation handle the provider
/// echoes back in its confirmation callback.
#[derive(Debug, Clone)]
pub struct ProviderOrder {
    pub id: String,
    pub approval_url: String,
}

/// Outcome of finalizing a previously authorized payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Completed,
    /// The provider reports the order was captured by an earlier call.
    /// Safe to treat as success; capture is idempotent at the provider.
    AlreadyCaptured,
    Declined,
}

#[derive(Debug, Clone)]
pub struct ProviderCapture {
    pub provider_order_id: String,
    pub status: CaptureStatus,
    /// Amount the provider reports as captured; absent on replays where
    /// the provider omits the original amounts.
    pub amount: Option<Decimal>,
}

/// Errors surfaced by a payment provider implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level or provider-side failure; nothing happened.
    #[error("provider transport error: {0}")]
    Transport(String),
    /// The provider understood the request and refused it.
    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

/// External payment provider contract: create an order for a fixed amount,
/// later capture it by id. Implementations must keep `capture_order` safe
/// to call more than once for the same id.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<ProviderOrder, ProviderError>;

    async fn capture_order(&self, provider_order_id: &str)
        -> Result<ProviderCapture, ProviderError>;
}

/// Adapter between the checkout orchestrator and a [`PaymentProvider`].
///
/// Bounds every provider call with a timeout and classifies failures:
/// transport problems and timeouts become `GatewayUnavailable` (transient,
/// no partial state), provider rejections become `PaymentFailed`.
#[derive(Clone)]
pub struct PaymentGateway {
    provider: Arc<dyn PaymentProvider>,
    timeout: Duration,
}

impl PaymentGateway {
    pub fn new(provider: Arc<dyn PaymentProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Requests an authorization for a fixed amount. The amount comes from
    /// the cart snapshot taken under the user lock and is never recomputed.
    #[instrument(skip(self))]
    pub async fn authorize(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<ProviderOrder, ServiceError> {
        match tokio::time::timeout(self.timeout, self.provider.create_order(amount, currency))
            .await
        {
            Err(_) => Err(ServiceError::GatewayUnavailable(format!(
                "authorization timed out after {:?}",
                self.timeout
            ))),
            Ok(Err(ProviderError::Transport(e))) => Err(ServiceError::GatewayUnavailable(e)),
            Ok(Err(ProviderError::Rejected(e))) => Err(ServiceError::PaymentFailed(e)),
            Ok(Ok(order)) => Ok(order),
        }
    }

    /// Finalizes a previously authorized payment.
    #[instrument(skip(self))]
    pub async fn capture(&self, provider_order_id: &str) -> Result<ProviderCapture, ServiceError> {
        match tokio::time::timeout(
            self.timeout,
            self.provider.capture_order(provider_order_id),
        )
        .await
        {
            Err(_) => Err(ServiceError::GatewayUnavailable(format!(
                "capture timed out after {:?}",
                self.timeout
            ))),
            Ok(Err(ProviderError::Transport(e))) => Err(ServiceError::GatewayUnavailable(e)),
            Ok(Err(ProviderError::Rejected(e))) => Err(ServiceError::PaymentFailed(e)),
            Ok(Ok(capture)) => Ok(capture),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    struct SlowProvider;

    #[async_trait]
    impl PaymentProvider for SlowProvider {
        async fn create_order(
            &self,
            _amount: Decimal,
            _currency: &str,
        ) -> Result<ProviderOrder, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("timeout should fire first")
        }

        async fn capture_order(
            &self,
            _provider_order_id: &str,
        ) -> Result<ProviderCapture, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("timeout should fire first")
        }
    }

    struct RejectingProvider;

    #[async_trait]
    impl PaymentProvider for RejectingProvider {
        async fn create_order(
            &self,
            _amount: Decimal,
            _currency: &str,
        ) -> Result<ProviderOrder, ProviderError> {
            Err(ProviderError::Rejected("INSTRUMENT_DECLINED".into()))
        }

        async fn capture_order(
            &self,
            _provider_order_id: &str,
        ) -> Result<ProviderCapture, ProviderError> {
            Err(ProviderError::Transport("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn timeout_classifies_as_gateway_unavailable() {
        let gateway = PaymentGateway::new(Arc::new(SlowProvider), Duration::from_millis(20));
        let err = gateway.authorize(dec!(10.00), "EUR").await.unwrap_err();
        assert_matches!(err, ServiceError::GatewayUnavailable(_));
    }

    #[tokio::test]
    async fn rejection_classifies_as_payment_failed() {
        let gateway = PaymentGateway::new(Arc::new(RejectingProvider), Duration::from_secs(1));
        let err = gateway.authorize(dec!(10.00), "EUR").await.unwrap_err();
        assert_matches!(err, ServiceError::PaymentFailed(_));
    }

    #[tokio::test]
    async fn transport_error_classifies_as_gateway_unavailable() {
        let gateway = PaymentGateway::new(Arc::new(RejectingProvider), Duration::from_secs(1));
        let err = gateway.capture("X1").await.unwrap_err();
        assert_matches!(err, ServiceError::GatewayUnavailable(_));
    }
}
