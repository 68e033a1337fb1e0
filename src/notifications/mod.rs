use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Fire-and-forget outbound email contract.
///
/// Callers must never let a delivery failure roll back the state change
/// that triggered the message; log it and move on.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError>;
}

/// Default implementation that records outbound mail in the log stream.
/// Stands in wherever a real SMTP relay is not wired up.
pub struct LogNotificationService;

#[async_trait]
impl NotificationService for LogNotificationService {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), NotificationError> {
        info!(%to, %subject, "outbound email");
        Ok(())
    }
}

/// A message accepted by [`MemoryNotificationService`].
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// In-memory implementation used by the integration tests to assert on
/// what would have been sent.
#[derive(Default)]
pub struct MemoryNotificationService {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationService for MemoryNotificationService {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), NotificationError> {
        self.sent.lock().await.push(OutboundEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
