//! Pricing of a cart selection against catalog snapshots.

use std::collections::{HashMap, HashSet};

use common::{GoodsId, Money, OrderId};
use order_store::{CartEntry, OrderLineItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog view of a good at the moment it is priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsInfo {
    pub id: GoodsId,
    pub name: String,
    pub price: Money,
    pub image: String,
}

/// Errors that can occur while pricing a selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("Nothing selected")]
    EmptySelection,

    #[error("Catalog returned no entry for goods {0}")]
    MissingGoods(GoodsId),

    #[error("Goods {0} selected with zero quantity")]
    ZeroQuantity(GoodsId),
}

/// One priced cart entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub goods_id: GoodsId,
    pub goods_name: String,
    pub goods_price: Money,
    pub goods_image: String,
    pub quantity: u32,
}

impl PricedLine {
    /// Returns price × quantity.
    pub fn amount(&self) -> Money {
        self.goods_price.multiply(self.quantity)
    }

    /// Freezes this line into a line-item row for `order_id`.
    pub fn to_line_item(&self, order_id: OrderId) -> OrderLineItem {
        OrderLineItem {
            order_id,
            goods_id: self.goods_id,
            goods_name: self.goods_name.clone(),
            goods_price: self.goods_price,
            goods_image: self.goods_image.clone(),
            quantity: self.quantity,
        }
    }
}

/// A fully priced selection; `total` is the sum of the line amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedSelection {
    pub lines: Vec<PricedLine>,
    pub total: Money,
}

impl PricedSelection {
    /// Builds the line-item rows for a persisted order.
    pub fn line_items(&self, order_id: OrderId) -> Vec<OrderLineItem> {
        self.lines.iter().map(|l| l.to_line_item(order_id)).collect()
    }

    /// Yields (goods, quantity) pairs, in selection order.
    pub fn quantities(&self) -> impl Iterator<Item = (GoodsId, u32)> + '_ {
        self.lines.iter().map(|l| (l.goods_id, l.quantity))
    }
}

/// Returns the goods ids referenced by `entries`, without duplicates, in first-seen order.
pub fn distinct_goods_ids(entries: &[CartEntry]) -> Vec<GoodsId> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|e| e.goods_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Prices every entry against `goods`.
///
/// Every referenced good must be present in `goods`; a partial catalog
/// answer fails the whole selection.
pub fn price_selection(
    entries: &[CartEntry],
    goods: &[GoodsInfo],
) -> Result<PricedSelection, PricingError> {
    if entries.is_empty() {
        return Err(PricingError::EmptySelection);
    }

    let by_id: HashMap<GoodsId, &GoodsInfo> = goods.iter().map(|g| (g.id, g)).collect();

    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.quantity == 0 {
            return Err(PricingError::ZeroQuantity(entry.goods_id));
        }
        let info = by_id
            .get(&entry.goods_id)
            .ok_or(PricingError::MissingGoods(entry.goods_id))?;
        lines.push(PricedLine {
            goods_id: info.id,
            goods_name: info.name.clone(),
            goods_price: info.price,
            goods_image: info.image.clone(),
            quantity: entry.quantity,
        });
    }

    let total = lines.iter().map(PricedLine::amount).sum();
    Ok(PricedSelection { lines, total })
}

#[cfg(test)]
mod tests {
    use common::UserId;

    use super::*;

    fn entry(goods: i32, quantity: u32) -> CartEntry {
        CartEntry {
            id: i64::from(goods),
            user_id: UserId::new(1),
            goods_id: GoodsId::new(goods),
            quantity,
            checked: true,
        }
    }

    fn goods(id: i32, cents: i64) -> GoodsInfo {
        GoodsInfo {
            id: GoodsId::new(id),
            name: format!("goods-{id}"),
            price: Money::from_cents(cents),
            image: format!("{id}.png"),
        }
    }

    #[test]
    fn test_total_is_sum_of_line_amounts() {
        let selection =
            price_selection(&[entry(1, 2), entry(2, 1)], &[goods(1, 1000), goods(2, 500)])
                .unwrap();

        assert_eq!(selection.total, Money::from_cents(2500));
        assert_eq!(selection.lines.len(), 2);
        assert_eq!(selection.lines[0].amount(), Money::from_cents(2000));

        let items = selection.line_items(OrderId::new(9));
        assert!(items.iter().all(|i| i.order_id == OrderId::new(9)));
        assert_eq!(
            items.iter().map(OrderLineItem::amount).sum::<Money>(),
            selection.total
        );
    }

    #[test]
    fn test_missing_goods_fails_whole_selection() {
        let err = price_selection(&[entry(1, 2), entry(2, 1)], &[goods(1, 1000)]).unwrap_err();
        assert_eq!(err, PricingError::MissingGoods(GoodsId::new(2)));
    }

    #[test]
    fn test_empty_selection() {
        assert_eq!(
            price_selection(&[], &[goods(1, 1000)]).unwrap_err(),
            PricingError::EmptySelection
        );
    }

    #[test]
    fn test_zero_quantity_rejected() {
        assert_eq!(
            price_selection(&[entry(1, 0)], &[goods(1, 1000)]).unwrap_err(),
            PricingError::ZeroQuantity(GoodsId::new(1))
        );
    }

    #[test]
    fn test_distinct_goods_ids_keeps_first_seen_order() {
        let ids = distinct_goods_ids(&[entry(3, 1), entry(1, 1), entry(3, 2)]);
        assert_eq!(ids, vec![GoodsId::new(3), GoodsId::new(1)]);
    }

    #[test]
    fn test_quantities() {
        let selection = price_selection(&[entry(1, 2)], &[goods(1, 100)]).unwrap();
        assert_eq!(
            selection.quantities().collect::<Vec<_>>(),
            vec![(GoodsId::new(1), 2)]
        );
    }
}
