//! Shared harness for integration tests: application state over a
//! tempfile-backed SQLite database, a scripted payment provider, and a
//! recording notification backend.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use storefront_api::{
    config::AppConfig,
    db,
    entities::ProductModel,
    events,
    gateway::{CaptureStatus, PaymentProvider, ProviderCapture, ProviderError, ProviderOrder},
    notifications::MemoryNotificationService,
    services::CreateProductInput,
    AppState,
};
use tempfile::TempDir;

/// Scripted payment provider. Approves everything by default; individual
/// tests flip the failure switches.
#[derive(Default)]
pub struct StubProvider {
    next_id: AtomicU32,
    capture_calls: AtomicU32,
    pub fail_authorize: AtomicBool,
    pub decline_capture: AtomicBool,
    state: Mutex<StubState>,
}

#[derive(Default)]
struct StubState {
    amounts: HashMap<String, Decimal>,
    captured: Vec<String>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount authorized for the given provider order, if any.
    pub fn authorized_amount(&self, provider_order_id: &str) -> Option<Decimal> {
        self.state
            .lock()
            .unwrap()
            .amounts
            .get(provider_order_id)
            .copied()
    }

    pub fn capture_calls(&self) -> u32 {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for StubProvider {
    async fn create_order(
        &self,
        amount: Decimal,
        _currency: &str,
    ) -> Result<ProviderOrder, ProviderError> {
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("connection refused".into()));
        }

        let id = format!("PP-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.state
            .lock()
            .unwrap()
            .amounts
            .insert(id.clone(), amount);

        Ok(ProviderOrder {
            approval_url: format!("https://provider.test/approve/{id}"),
            id,
        })
    }

    async fn capture_order(
        &self,
        provider_order_id: &str,
    ) -> Result<ProviderCapture, ProviderError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);

        if self.decline_capture.load(Ordering::SeqCst) {
            return Ok(ProviderCapture {
                provider_order_id: provider_order_id.to_string(),
                status: CaptureStatus::Declined,
                amount: None,
            });
        }

        let mut state = self.state.lock().unwrap();
        let amount = state.amounts.get(provider_order_id).copied();

        if state.captured.iter().any(|id| id == provider_order_id) {
            return Ok(ProviderCapture {
                provider_order_id: provider_order_id.to_string(),
                status: CaptureStatus::AlreadyCaptured,
                amount: None,
            });
        }

        state.captured.push(provider_order_id.to_string());
        Ok(ProviderCapture {
            provider_order_id: provider_order_id.to_string(),
            status: CaptureStatus::Completed,
            amount,
        })
    }
}

/// Helper harness for spinning up application state backed by a fresh
/// SQLite database in a temporary directory.
pub struct TestApp {
    pub state: AppState,
    pub provider: Arc<StubProvider>,
    pub mailer: Arc<MemoryNotificationService>,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Same as [`TestApp::new`] but lets the test adjust the configuration
    /// before services are wired.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let tmp = TempDir::new().expect("temp dir for test database");
        let db_path = tmp.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(format!("sqlite://{}?mode=rwc", db_path.display()));
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to bootstrap schema in tests");

        let (event_sender, receiver) = events::channel(64);
        let event_task = events::spawn_logger(receiver);

        let provider = Arc::new(StubProvider::new());
        let mailer = Arc::new(MemoryNotificationService::new());

        let state = AppState::new(
            Arc::new(pool),
            cfg,
            provider.clone(),
            mailer.clone(),
            event_sender,
        );

        Self {
            state,
            provider,
            mailer,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    pub async fn seed_product(&self, name: &str, unit_price: Decimal) -> ProductModel {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                unit_price,
                image_url: None,
            })
            .await
            .expect("seed product")
    }
}
