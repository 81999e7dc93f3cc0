//! Payloads carried through the broker.

use common::{Money, OrderSn, UserId};
use domain::PricedSelection;
use order_store::NewOrder;
use serde::{Deserialize, Serialize};

use crate::clients::StockLine;

/// Draft order carried by the half message; it has no id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub order_sn: OrderSn,
    pub user_id: UserId,
    pub address: String,
    pub signer_name: String,
    pub signer_mobile: String,
    pub post: String,
}

impl OrderDraft {
    /// Builds the order row for this draft.
    pub fn to_new_order(&self, total: Money) -> NewOrder {
        NewOrder {
            order_sn: self.order_sn.clone(),
            user_id: self.user_id,
            address: self.address.clone(),
            signer_name: self.signer_name.clone(),
            signer_mobile: self.signer_mobile.clone(),
            post: self.post.clone(),
            total,
        }
    }
}

/// Delayed notice that the payment window of an order has closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTimeout {
    pub order_sn: OrderSn,
    pub user_id: UserId,
    /// Stock deducted for the order.
    pub lines: Vec<StockLine>,
}

/// Request to give back the stock deducted for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReturn {
    pub order_sn: OrderSn,
    pub lines: Vec<StockLine>,
}

/// Returns the stock lines of a priced selection.
pub fn stock_lines(selection: &PricedSelection) -> Vec<StockLine> {
    selection
        .quantities()
        .map(|(goods_id, quantity)| StockLine { goods_id, quantity })
        .collect()
}
