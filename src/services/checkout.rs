use crate::{
    config::AppConfig,
    entities::{
        cart, cart_item, checkout_session, order, Cart, CartItem, CheckoutSession, CheckoutStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CaptureStatus, PaymentGateway},
    notifications::NotificationService,
    services::carts::CartService,
    services::locks::UserLocks,
    services::orders::{CreateOrderInput, OrderService},
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Shipping and contact data collected before payment. Stored on the
/// checkout session row so the capture callback is self-contained.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShippingDetails {
    #[validate(length(min = 1))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(min = 1))]
    pub shipping_address: String,
    #[validate(length(min = 5))]
    pub contact_phone: String,
    #[validate(length(min = 1))]
    pub payment_method: String,
}

/// Where to send the shopper to approve the payment
#[derive(Debug, Clone)]
pub struct CheckoutRedirect {
    pub session_id: Uuid,
    pub provider_order_id: String,
    pub approval_url: String,
}

/// Result of a completion attempt
#[derive(Debug)]
pub enum CheckoutOutcome {
    /// The order was created by this call.
    Completed(order::Model),
    /// The session had already advanced (duplicate callback, concurrent
    /// delivery, or unknown handle). Nothing was done; not an error.
    AlreadyProcessed,
}

/// Checkout orchestrator: drives a cart through authorize → capture →
/// convert and guarantees each cart is billed and turned into an order at
/// most once.
///
/// State transitions are conditional updates filtered on the expected
/// current status, so of two racing callers exactly one advances the
/// session and the other observes the new state and no-ops.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<PaymentGateway>,
    carts: Arc<CartService>,
    orders: Arc<OrderService>,
    locks: Arc<UserLocks>,
    notifier: Arc<dyn NotificationService>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<PaymentGateway>,
        carts: Arc<CartService>,
        orders: Arc<OrderService>,
        locks: Arc<UserLocks>,
        notifier: Arc<dyn NotificationService>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            carts,
            orders,
            locks,
            notifier,
            event_sender,
            config,
        }
    }

    /// Snapshots the cart, authorizes its total with the payment provider,
    /// and persists a Pending session keyed by the provider's order id.
    ///
    /// Runs under the user lock so no cart mutation can slip in between the
    /// snapshot and the authorization. On any failure nothing is persisted
    /// and the cart is untouched.
    #[instrument(skip(self, details))]
    pub async fn begin_checkout(
        &self,
        user_id: Uuid,
        details: ShippingDetails,
    ) -> Result<CheckoutRedirect, ServiceError> {
        details.validate()?;

        let _guard = self.locks.acquire(user_id).await;

        let snapshot = self.carts.snapshot(user_id).await?;
        if snapshot.lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        self.resolve_active_session(user_id).await?;

        let provider_order = self
            .gateway
            .authorize(snapshot.subtotal, &self.config.currency)
            .await?;

        let now = Utc::now();
        let session_id = Uuid::new_v4();
        let items = serde_json::to_value(&snapshot.lines)
            .map_err(|e| ServiceError::Internal(e.into()))?;

        let session = checkout_session::ActiveModel {
            id: Set(session_id),
            user_id: Set(user_id),
            provider_order_id: Set(provider_order.id.clone()),
            status: Set(CheckoutStatus::Pending),
            currency: Set(self.config.currency.clone()),
            total: Set(snapshot.subtotal),
            items: Set(items),
            customer_name: Set(details.customer_name),
            customer_email: Set(details.customer_email),
            shipping_address: Set(details.shipping_address),
            contact_phone: Set(details.contact_phone),
            payment_method: Set(details.payment_method),
            order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        session.insert(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                user_id,
                session_id,
            })
            .await;

        info!(
            %session_id,
            provider_order_id = %provider_order.id,
            total = %snapshot.subtotal,
            "checkout session opened"
        );

        Ok(CheckoutRedirect {
            session_id,
            provider_order_id: provider_order.id,
            approval_url: provider_order.approval_url,
        })
    }

    /// Handles the provider's payment confirmation callback.
    ///
    /// Unknown handles and sessions that already advanced absorb the call
    /// as a no-op success: the provider redelivers callbacks and shoppers
    /// refresh return pages. A capture failure marks the session Failed and
    /// leaves the cart intact; a transport failure leaves the session
    /// Pending so the callback can be retried.
    #[instrument(skip(self))]
    pub async fn complete_checkout(
        &self,
        provider_order_id: &str,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let session = CheckoutSession::find()
            .filter(checkout_session::Column::ProviderOrderId.eq(provider_order_id))
            .one(&*self.db)
            .await?;

        let Some(session) = session else {
            info!(%provider_order_id, "callback for unknown provider order, ignoring");
            return Ok(CheckoutOutcome::AlreadyProcessed);
        };

        match session.status {
            CheckoutStatus::Converted | CheckoutStatus::Failed => {
                debug!(session_id = %session.id, status = ?session.status, "duplicate callback, ignoring");
                Ok(CheckoutOutcome::AlreadyProcessed)
            }
            // Money already moved; finish the conversion without touching
            // the gateway again.
            CheckoutStatus::Captured => self.convert(session).await,
            CheckoutStatus::Pending => {
                let capture = match self.gateway.capture(provider_order_id).await {
                    Ok(capture) => capture,
                    Err(err @ ServiceError::GatewayUnavailable(_)) => return Err(err),
                    Err(err) => {
                        self.fail_session(&session).await?;
                        return Err(err);
                    }
                };

                if capture.status == CaptureStatus::Declined {
                    self.fail_session(&session).await?;
                    return Err(ServiceError::PaymentFailed(
                        "capture declined by provider".to_string(),
                    ));
                }

                if let Some(amount) = capture.amount {
                    if amount != session.total {
                        warn!(
                            session_id = %session.id,
                            authorized = %session.total,
                            captured = %amount,
                            "captured amount differs from authorized total"
                        );
                    }
                }

                let claimed = self
                    .transition(session.id, CheckoutStatus::Pending, CheckoutStatus::Captured, None)
                    .await?;
                if !claimed {
                    debug!(session_id = %session.id, "concurrent delivery advanced the session first");
                    return Ok(CheckoutOutcome::AlreadyProcessed);
                }

                self.event_sender
                    .send_or_log(Event::PaymentCaptured(session.id))
                    .await;

                let session = CheckoutSession::find_by_id(session.id)
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("checkout session {}", session.id))
                    })?;

                self.convert(session).await
            }
        }
    }

    /// Re-drives a Captured session to Converted. For reconciliation after
    /// a conversion failure; never calls the gateway.
    #[instrument(skip(self))]
    pub async fn resume_conversion(
        &self,
        session_id: Uuid,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let session = CheckoutSession::find_by_id(session_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("checkout session {} not found", session_id))
            })?;

        match session.status {
            CheckoutStatus::Captured => self.convert(session).await,
            CheckoutStatus::Converted => Ok(CheckoutOutcome::AlreadyProcessed),
            CheckoutStatus::Pending => Err(ServiceError::InvalidOperation(
                "payment has not been captured yet".to_string(),
            )),
            CheckoutStatus::Failed => Err(ServiceError::InvalidOperation(
                "session failed before capture; nothing to resume".to_string(),
            )),
        }
    }

    /// Converts every Captured session that is still waiting. Intended for
    /// a periodic maintenance task; returns how many orders were created.
    pub async fn reconcile_captured(&self) -> Result<u64, ServiceError> {
        let sessions = CheckoutSession::find()
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::Captured))
            .all(&*self.db)
            .await?;

        let mut converted = 0;
        for session in sessions {
            let session_id = session.id;
            match self.convert(session).await {
                Ok(CheckoutOutcome::Completed(_)) => converted += 1,
                Ok(CheckoutOutcome::AlreadyProcessed) => {}
                Err(e) => warn!(%session_id, "reconciliation attempt failed: {e}"),
            }
        }

        Ok(converted)
    }

    /// Fails Pending sessions older than the configured staleness window.
    /// Callbacks for an expired session, should they ever arrive, find a
    /// Failed session and no-op.
    pub async fn expire_stale_sessions(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::minutes(self.config.checkout_pending_ttl_minutes);

        let stale = CheckoutSession::find()
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::Pending))
            .filter(checkout_session::Column::UpdatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut expired = 0;
        for session in stale {
            if self
                .transition(session.id, CheckoutStatus::Pending, CheckoutStatus::Failed, None)
                .await?
            {
                self.event_sender
                    .send_or_log(Event::CheckoutExpired(session.id))
                    .await;
                expired += 1;
            }
        }

        if expired > 0 {
            info!(expired, "expired stale pending checkout sessions");
        }
        Ok(expired)
    }

    /// Enforces the one-active-session-per-user rule before a new
    /// authorization is requested.
    ///
    /// A Pending session is superseded: it is failed here, and its callback
    /// (if the shopper ever completes the old approval) finds a Failed
    /// session and no-ops. A Captured session blocks new checkouts until
    /// reconciliation converts it, since that payment has already been
    /// taken.
    async fn resolve_active_session(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let active = CheckoutSession::find()
            .filter(checkout_session::Column::UserId.eq(user_id))
            .filter(
                checkout_session::Column::Status
                    .is_in([CheckoutStatus::Pending, CheckoutStatus::Captured]),
            )
            .one(&*self.db)
            .await?;

        let Some(session) = active else {
            return Ok(());
        };

        match session.status {
            CheckoutStatus::Captured => Err(ServiceError::CheckoutInProgress(session.id)),
            CheckoutStatus::Pending => {
                if self
                    .transition(session.id, CheckoutStatus::Pending, CheckoutStatus::Failed, None)
                    .await?
                {
                    info!(superseded = %session.id, "superseded prior pending checkout session");
                    self.event_sender
                        .send_or_log(Event::CheckoutExpired(session.id))
                        .await;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The exactly-once conversion step: order creation, cart clearing, and
    /// the Captured→Converted transition commit or roll back together. If
    /// the final transition loses to a concurrent converter the whole
    /// transaction rolls back and the call reports `AlreadyProcessed`.
    async fn convert(
        &self,
        session: checkout_session::Model,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let lines = session
            .line_items()
            .map_err(|e| ServiceError::Internal(e.into()))?;

        let txn = self.db.begin().await?;

        let order = self
            .orders
            .create_from_snapshot(
                &txn,
                CreateOrderInput {
                    user_id: session.user_id,
                    customer_name: session.customer_name.clone(),
                    customer_email: session.customer_email.clone(),
                    currency: session.currency.clone(),
                    payment_method: session.payment_method.clone(),
                    shipping_address: session.shipping_address.clone(),
                    contact_phone: session.contact_phone.clone(),
                    lines,
                },
            )
            .await?;

        // The order reflects the snapshot frozen at authorization time; the
        // live cart is consumed here whatever its current contents.
        let mut cleared_cart = None;
        if let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(session.user_id))
            .one(&txn)
            .await?
        {
            CartItem::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&txn)
                .await?;

            cleared_cart = Some(cart.id);
            let mut cart: cart::ActiveModel = cart.into();
            cart.updated_at = Set(Utc::now());
            cart.update(&txn).await?;
        }

        let advanced = self
            .transition_on(
                &txn,
                session.id,
                CheckoutStatus::Captured,
                CheckoutStatus::Converted,
                Some(order.id),
            )
            .await?;

        if !advanced {
            txn.rollback().await?;
            debug!(session_id = %session.id, "session converted by a concurrent caller");
            return Ok(CheckoutOutcome::AlreadyProcessed);
        }

        txn.commit().await?;

        if let Some(cart_id) = cleared_cart {
            self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        }
        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                session_id: session.id,
                order_id: order.id,
            })
            .await;

        let body = format!(
            "Thank you {}!\n\nYour order {} for {} {} has been received and paid.",
            session.customer_name, order.id, order.total_amount, order.currency
        );
        if let Err(e) = self
            .notifier
            .send(&session.customer_email, "Your order is confirmed", &body)
            .await
        {
            warn!(session_id = %session.id, "order confirmation email failed: {e}");
        }

        info!(
            session_id = %session.id,
            order_id = %order.id,
            "checkout session converted"
        );
        Ok(CheckoutOutcome::Completed(order))
    }

    async fn fail_session(&self, session: &checkout_session::Model) -> Result<(), ServiceError> {
        if self
            .transition(session.id, CheckoutStatus::Pending, CheckoutStatus::Failed, None)
            .await?
        {
            self.event_sender
                .send_or_log(Event::PaymentFailed(session.id))
                .await;
            warn!(session_id = %session.id, "checkout session failed at capture");
        }
        Ok(())
    }

    async fn transition(
        &self,
        session_id: Uuid,
        from: CheckoutStatus,
        to: CheckoutStatus,
        order_id: Option<Uuid>,
    ) -> Result<bool, ServiceError> {
        self.transition_on(&*self.db, session_id, from, to, order_id)
            .await
    }

    /// Conditional status update: succeeds only when the session is still in
    /// `from`. Exactly one of any number of racing callers wins.
    async fn transition_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        session_id: Uuid,
        from: CheckoutStatus,
        to: CheckoutStatus,
        order_id: Option<Uuid>,
    ) -> Result<bool, ServiceError> {
        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidOperation(format!(
                "illegal checkout transition {from:?} -> {to:?}"
            )));
        }

        let mut update = CheckoutSession::update_many()
            .col_expr(checkout_session::Column::Status, Expr::value(to))
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(checkout_session::Column::Id.eq(session_id))
            .filter(checkout_session::Column::Status.eq(from));

        if let Some(order_id) = order_id {
            update = update.col_expr(checkout_session::Column::OrderId, Expr::value(order_id));
        }

        let result = update.exec(conn).await?;
        Ok(result.rows_affected == 1)
    }
}
