pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod locks;
pub mod orders;
pub mod tokens;

pub use carts::CartService;
pub use catalog::{CatalogService, CreateProductInput, ProductInfo, ProductLookup};
pub use checkout::{CheckoutOutcome, CheckoutRedirect, CheckoutService, ShippingDetails};
pub use locks::UserLocks;
pub use orders::{OrderService, OrderWithItems};
pub use tokens::{ConsumedToken, IssuedToken, TokenService};

use std::sync::Arc;

/// Bundle of service handles shared by transport layers and background
/// tasks. Built once by [`crate::AppState::new`].
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub tokens: Arc<TokenService>,
    pub catalog: Arc<CatalogService>,
}
