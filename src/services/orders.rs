use crate::{
    entities::{
        checkout_session::LineSnapshot, order, order_item, Order, OrderItem,
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Read and write surface for completed orders.
///
/// Orders are written exactly once, inside the checkout conversion
/// transaction, and never mutated afterwards.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persists an order and its line items from a frozen cart snapshot.
    ///
    /// Runs on the caller's connection so conversion can make it part of a
    /// larger transaction. The total is recomputed from the lines, keeping
    /// the stored amount equal to the sum of its items by construction.
    pub async fn create_from_snapshot<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: CreateOrderInput,
    ) -> Result<order::Model, ServiceError> {
        if input.lines.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "order must contain at least one line".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let total: Decimal = input.lines.iter().map(LineSnapshot::line_total).sum();

        let model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(input.user_id),
            customer_name: Set(input.customer_name),
            customer_email: Set(input.customer_email),
            status: Set(order::STATUS_PAID.to_string()),
            currency: Set(input.currency),
            total_amount: Set(total),
            payment_method: Set(input.payment_method),
            shipping_address: Set(input.shipping_address),
            contact_phone: Set(input.contact_phone),
            created_at: Set(now),
        };
        let created = model.insert(conn).await?;

        for line in &input.lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total()),
                created_at: Set(now),
            };
            item.insert(conn).await?;
        }

        info!(%order_id, %total, "created order from snapshot");
        Ok(created)
    }

    /// Fetches an order and its items.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;

        let items = order
            .find_related(OrderItem)
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(OrderWithItems { order, items })
    }

    /// Order history for a user, newest first.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((data, total))
    }
}

/// Input for materializing an order from a checkout session snapshot
#[derive(Debug)]
pub struct CreateOrderInput {
    pub user_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub currency: String,
    pub payment_method: String,
    pub shipping_address: String,
    pub contact_phone: String,
    pub lines: Vec<LineSnapshot>,
}

/// Order with items
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}
