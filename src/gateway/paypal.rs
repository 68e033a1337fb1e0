use super::{CaptureStatus, PaymentProvider, ProviderCapture, ProviderError, ProviderOrder};
use crate::config::GatewayConfig;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const ALREADY_CAPTURED: &str = "ORDER_ALREADY_CAPTURED";

/// PayPal Orders v2 client: OAuth2 client-credentials token, order creation
/// with a CAPTURE intent, and order capture. The approval UI itself is the
/// provider's concern; this client only drives the REST protocol.
pub struct PayPalProvider {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl PayPalProvider {
    pub fn new(config: GatewayConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self { http, config })
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.config.base_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Rejected(format!(
                "token request failed with status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    async fn create_order(
        &self,
        amount: Decimal,
        currency: &str,
    ) -> Result<ProviderOrder, ProviderError> {
        let token = self.access_token().await?;

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "amount": {
                    "currency_code": currency,
                    "value": format!("{:.2}", amount),
                }
            }],
            "application_context": {
                "return_url": self.config.return_url,
                "cancel_url": self.config.cancel_url,
            }
        });

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.config.base_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!(
                "order creation failed with status {status}: {detail}"
            )));
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let approval_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone())
            .ok_or_else(|| {
                ProviderError::Rejected(format!("order {} has no approval link", order.id))
            })?;

        debug!(order_id = %order.id, "created provider order");
        Ok(ProviderOrder {
            id: order.id,
            approval_url,
        })
    }

    async fn capture_order(
        &self,
        provider_order_id: &str,
    ) -> Result<ProviderCapture, ProviderError> {
        let token = self.access_token().await?;

        let response = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.config.base_url, provider_order_id
            ))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let detail = response.text().await.unwrap_or_default();
            // The provider redelivers confirmation callbacks; a capture that
            // already went through is a success, not an error.
            if detail.contains(ALREADY_CAPTURED) {
                warn!(%provider_order_id, "capture replay, order already captured");
                return Ok(ProviderCapture {
                    provider_order_id: provider_order_id.to_string(),
                    status: CaptureStatus::AlreadyCaptured,
                    amount: None,
                });
            }
            return Ok(ProviderCapture {
                provider_order_id: provider_order_id.to_string(),
                status: CaptureStatus::Declined,
                amount: None,
            });
        }

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!(
                "capture failed with status {status}: {detail}"
            )));
        }

        let capture: CaptureResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let amount = capture
            .purchase_units
            .iter()
            .flat_map(|unit| unit.payments.captures.iter())
            .filter_map(|c| c.amount.value.parse::<Decimal>().ok())
            .next();

        let status = if capture.status == "COMPLETED" {
            CaptureStatus::Completed
        } else {
            CaptureStatus::Declined
        };

        Ok(ProviderCapture {
            provider_order_id: capture.id,
            status,
            amount,
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Deserialize, Default)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Payments,
}

#[derive(Deserialize, Default)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Deserialize)]
struct Capture {
    amount: Amount,
}

#[derive(Deserialize)]
struct Amount {
    value: String,
}
