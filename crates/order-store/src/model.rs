use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GoodsId, Money, OrderId, OrderSn, UserId};

/// Payment status of an order.
///
/// State transitions:
/// ```text
/// PENDING ──┬──► TRADE_SUCCESS
///           └──► TRADE_CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created and waiting for payment.
    #[default]
    Pending,

    /// Paid (terminal state).
    TradeSuccess,

    /// Closed without payment, stock returned (terminal state).
    TradeClosed,
}

impl OrderStatus {
    /// Returns true if the order may move from this status to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (
                OrderStatus::Pending,
                OrderStatus::TradeSuccess | OrderStatus::TradeClosed
            )
        )
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::TradeSuccess | OrderStatus::TradeClosed)
    }

    /// Returns the status as stored and exchanged on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::TradeSuccess => "TRADE_SUCCESS",
            OrderStatus::TradeClosed => "TRADE_CLOSED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "TRADE_SUCCESS" => Ok(OrderStatus::TradeSuccess),
            "TRADE_CLOSED" => Ok(OrderStatus::TradeClosed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// An order row ready to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_sn: OrderSn,
    pub user_id: UserId,
    pub address: String,
    pub signer_name: String,
    pub signer_mobile: String,
    pub post: String,
    pub total: Money,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_sn: OrderSn,
    pub user_id: UserId,
    pub address: String,
    pub signer_name: String,
    pub signer_mobile: String,
    pub post: String,
    pub total: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Builds the persisted form of a new order.
    pub fn from_new(id: OrderId, new: NewOrder, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            order_sn: new.order_sn,
            user_id: new.user_id,
            address: new.address,
            signer_name: new.signer_name,
            signer_mobile: new.signer_mobile,
            post: new.post,
            total: new.total,
            status: OrderStatus::Pending,
            created_at,
        }
    }
}

/// Snapshot of a purchased good, frozen at order creation.
///
/// Name, price and image are copied from the catalog so later catalog
/// changes never rewrite order history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub order_id: OrderId,
    pub goods_id: GoodsId,
    pub goods_name: String,
    pub goods_price: Money,
    pub goods_image: String,
    pub quantity: u32,
}

impl OrderLineItem {
    /// Returns price × quantity.
    pub fn amount(&self) -> Money {
        self.goods_price.multiply(self.quantity)
    }
}

/// Largest quantity a cart entry or line item can hold (the column is a signed 32-bit integer).
pub const MAX_QUANTITY: u32 = i32::MAX as u32;

/// A user's pending selection of a good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    pub id: i64,
    pub user_id: UserId,
    pub goods_id: GoodsId,
    pub quantity: u32,
    pub checked: bool,
}
