use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Checkout session status.
///
/// Allowed transitions: Pending → Captured → Converted, Pending → Failed.
/// A Captured session whose conversion keeps failing stays Captured and is
/// re-driven by reconciliation; the payment has already been taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum CheckoutStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "captured")]
    Captured,
    #[sea_orm(string_value = "converted")]
    Converted,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl CheckoutStatus {
    /// Transitions the state machine accepts. Captured → Failed covers
    /// manual reconciliation of a funds-held session; everything else is
    /// rejected outright.
    pub fn can_transition_to(self, next: CheckoutStatus) -> bool {
        matches!(
            (self, next),
            (CheckoutStatus::Pending, CheckoutStatus::Captured)
                | (CheckoutStatus::Pending, CheckoutStatus::Failed)
                | (CheckoutStatus::Captured, CheckoutStatus::Converted)
                | (CheckoutStatus::Captured, CheckoutStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CheckoutStatus::Converted | CheckoutStatus::Failed)
    }
}

/// One authorize→capture→convert attempt.
///
/// Keyed both by its own id and by the provider's order id (the correlation
/// handle in redirect callbacks). Carries the cart snapshot frozen at
/// authorization time plus the shipping data the shopper submitted, so a
/// capture callback can complete without any other request-scoped state.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(unique, column_type = "Text")]
    pub provider_order_id: String,
    pub status: CheckoutStatus,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total: Decimal,
    /// Frozen `Vec<LineSnapshot>` serialized as JSON
    #[sea_orm(column_type = "Json")]
    pub items: Json,
    pub customer_name: String,
    pub customer_email: String,
    pub shipping_address: String,
    pub contact_phone: String,
    pub payment_method: String,
    #[sea_orm(nullable)]
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// One cart line frozen into a checkout session at authorization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl LineSnapshot {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

impl Model {
    /// Deserializes the frozen line items.
    pub fn line_items(&self) -> Result<Vec<LineSnapshot>, serde_json::Error> {
        serde_json::from_value(self.items.clone())
    }
}
