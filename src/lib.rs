//! Storefront API Library
//!
//! Core services for the Storefront commerce platform: per-user carts,
//! checkout orchestration against an external payment provider, immutable
//! order records, and the single-use security tokens behind password reset
//! and email verification links. Transport layers (HTTP, gRPC) live in the
//! host binaries and call into [`AppState`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod notifications;
pub mod services;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::gateway::{PaymentGateway, PaymentProvider};
use crate::notifications::NotificationService;
use crate::services::{
    AppServices, CartService, CatalogService, CheckoutService, OrderService, TokenService,
    UserLocks,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: AppServices,
}

impl AppState {
    /// Wires every service against the given database, payment provider,
    /// and notification backend.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn NotificationService>,
        event_sender: EventSender,
    ) -> Self {
        let config = Arc::new(config);
        let event_sender = Arc::new(event_sender);
        let locks = Arc::new(UserLocks::new());

        let gateway = Arc::new(PaymentGateway::new(
            provider,
            Duration::from_secs(config.gateway.timeout_secs),
        ));

        let catalog = Arc::new(CatalogService::new(db.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            catalog.clone(),
            locks.clone(),
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(db.clone()));
        let tokens = Arc::new(TokenService::new(
            db.clone(),
            notifier.clone(),
            config.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            gateway,
            carts.clone(),
            orders.clone(),
            locks,
            notifier,
            event_sender.clone(),
            config.clone(),
        ));

        Self {
            db,
            config,
            event_sender,
            services: AppServices {
                carts,
                checkout,
                orders,
                tokens,
                catalog,
            },
        }
    }
}
