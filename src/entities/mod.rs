pub mod cart;
pub mod cart_item;
pub mod checkout_session;
pub mod order;
pub mod order_item;
pub mod product;
pub mod security_token;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use checkout_session::{
    CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel,
};
pub use order::{Entity as Order, Model as OrderModel};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use security_token::{Entity as SecurityToken, Model as SecurityTokenModel, TokenPurpose};
