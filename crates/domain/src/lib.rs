//! Business rules of the order service.
//!
//! This crate sits on top of the order store and provides:
//! - Order number generation
//! - Pricing of a cart selection against catalog snapshots
//! - Cart management (add, update, delete, list)
//! - Order queries and payment-status updates

pub mod cart;
pub mod error;
pub mod order_sn;
pub mod orders;
pub mod pricing;

pub use cart::{CartService, CartSummary};
pub use error::DomainError;
pub use order_sn::{format_order_sn, generate_order_sn};
pub use orders::{OrderDetail, OrderService};
pub use pricing::{
    GoodsInfo, PricedLine, PricedSelection, PricingError, distinct_goods_ids, price_selection,
};
