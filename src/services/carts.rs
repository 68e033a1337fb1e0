use crate::{
    entities::{cart, cart_item, checkout_session::LineSnapshot, Cart, CartItem},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::ProductLookup,
    services::locks::UserLocks,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Per-user shopping cart service.
///
/// Every mutation serializes on the owner's lock so that a concurrent
/// snapshot+authorize (checkout) never observes a half-applied cart. The
/// cart row itself is created lazily on the first item addition.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn ProductLookup>,
    locks: Arc<UserLocks>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn ProductLookup>,
        locks: Arc<UserLocks>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            catalog,
            locks,
            event_sender,
        }
    }

    /// Adds a product to the user's cart, merging quantities when the line
    /// already exists. Name, price, and image are copied from the catalog
    /// at insert time and not refreshed afterwards.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::InvalidQuantity(quantity));
        }

        let _guard = self.locks.acquire(user_id).await;

        let product = self.catalog.get_product(product_id).await?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let (cart, created) = match Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
        {
            Some(cart) => (cart, false),
            None => {
                let model = cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                (model.insert(&txn).await?, true)
            }
        };

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        if let Some(item) = existing {
            let merged = item.quantity + quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(merged);
            item.updated_at = Set(now);
            item.update(&txn).await?;
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                unit_price: Set(product.unit_price),
                product_name: Set(product.name),
                image_url: Set(product.image_url),
                created_at: Set(now),
                updated_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        let cart_id = cart.id;
        let mut cart: cart::ActiveModel = cart.into();
        cart.updated_at = Set(now);
        cart.update(&txn).await?;

        txn.commit().await?;

        if created {
            self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;
        }
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id,
            })
            .await;

        info!(%cart_id, %product_id, quantity, "added item to cart");
        self.get_cart(user_id).await
    }

    /// Sets the quantity of an existing line. Zero removes the line; a cart
    /// never holds a zero-quantity entry.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        new_quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if new_quantity < 0 {
            return Err(ServiceError::InvalidQuantity(new_quantity));
        }
        if new_quantity == 0 {
            return self.remove_item(user_id, product_id).await;
        }

        let _guard = self.locks.acquire(user_id).await;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::ItemNotFound(product_id))?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::ItemNotFound(product_id))?;

        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(new_quantity);
        item.updated_at = Set(now);
        item.update(&txn).await?;

        let cart_id = cart.id;
        let mut cart: cart::ActiveModel = cart.into();
        cart.updated_at = Set(now);
        cart.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemUpdated {
                cart_id,
                product_id,
            })
            .await;

        self.get_cart(user_id).await
    }

    /// Removes a line entirely, regardless of quantity.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let _guard = self.locks.acquire(user_id).await;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::ItemNotFound(product_id))?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or(ServiceError::ItemNotFound(product_id))?;

        item.delete(&txn).await?;

        let cart_id = cart.id;
        let mut cart: cart::ActiveModel = cart.into();
        cart.updated_at = Set(now);
        cart.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id,
                product_id,
            })
            .await;

        self.get_cart(user_id).await
    }

    /// Empties the cart. Idempotent: clearing an absent or already-empty
    /// cart succeeds quietly.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.locks.acquire(user_id).await;

        let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(());
        };

        let txn = self.db.begin().await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let cart_id = cart.id;
        let mut cart: cart::ActiveModel = cart.into();
        cart.updated_at = Set(Utc::now());
        cart.update(&txn).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        info!(%cart_id, "cleared cart");
        Ok(())
    }

    /// Current cart contents and subtotal. An absent cart reads as empty.
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let items = self.load_items(user_id).await?;
        let subtotal = subtotal(&items);
        Ok(CartView { items, subtotal })
    }

    /// Freezes the current cart lines for checkout.
    ///
    /// Atomicity with authorization comes from the caller holding the user
    /// lock across snapshot and authorize; this method itself only reads.
    pub async fn snapshot(&self, user_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let items = self.load_items(user_id).await?;
        let lines: Vec<LineSnapshot> = items
            .iter()
            .map(|item| LineSnapshot {
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();
        let subtotal = lines.iter().map(LineSnapshot::line_total).sum();

        Ok(CartSnapshot { lines, subtotal })
    }

    async fn load_items(&self, user_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(Vec::new());
        };

        Ok(cart
            .find_related(CartItem)
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

/// Sum of quantity × unit price over the given lines.
pub fn subtotal(items: &[cart_item::Model]) -> Decimal {
    items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum()
}

/// Cart contents as seen by the owner
#[derive(Debug, Serialize)]
pub struct CartView {
    pub items: Vec<cart_item::Model>,
    pub subtotal: Decimal,
}

/// Cart lines frozen at checkout time
#[derive(Debug, Clone)]
pub struct CartSnapshot {
    pub lines: Vec<LineSnapshot>,
    pub subtotal: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn item(quantity: i32, unit_price: Decimal) -> cart_item::Model {
        let now = Utc::now();
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            product_name: "item".to_string(),
            image_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn subtotal_of_empty_cart_is_zero() {
        assert_eq!(subtotal(&[]), Decimal::ZERO);
    }

    #[test]
    fn subtotal_multiplies_quantity_by_unit_price() {
        let items = vec![item(2, dec!(3.50)), item(1, dec!(10.00))];
        assert_eq!(subtotal(&items), dec!(17.00));
    }

    proptest! {
        #[test]
        fn subtotal_equals_sum_of_line_totals(
            lines in proptest::collection::vec((1..=50i32, 1u32..1_000_000u32), 0..10)
        ) {
            let items: Vec<cart_item::Model> = lines
                .iter()
                .map(|(quantity, cents)| {
                    item(*quantity, Decimal::new(i64::from(*cents), 2))
                })
                .collect();

            let expected: Decimal = items
                .iter()
                .map(|i| i.unit_price * Decimal::from(i.quantity))
                .sum();

            prop_assert_eq!(subtotal(&items), expected);
        }
    }
}
