//! Shared types used across the order service crates.

mod money;
mod types;

pub use money::Money;
pub use types::{GoodsId, OrderId, OrderSn, UserId};
