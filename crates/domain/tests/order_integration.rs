//! Integration tests for the cart and order services.
//!
//! These tests drive the services the way the HTTP layer does, over the
//! in-memory store, and check the cart → priced selection → order detail path.

use domain::{CartService, DomainError, GoodsInfo, OrderService, distinct_goods_ids, price_selection};
use order_store::{
    GoodsId, InMemoryOrderStore, Money, NewOrder, OrderQuery, OrderSn, OrderStatus, OrderStore,
    StoreTransaction, UserId,
};

const USER: UserId = UserId::new(7);

fn catalog() -> Vec<GoodsInfo> {
    vec![
        GoodsInfo {
            id: GoodsId::new(1),
            name: "Apple".to_string(),
            price: Money::from_cents(1000),
            image: "apple.png".to_string(),
        },
        GoodsInfo {
            id: GoodsId::new(2),
            name: "Pear".to_string(),
            price: Money::from_cents(500),
            image: "pear.png".to_string(),
        },
    ]
}

mod checkout_path {
    use super::*;

    #[tokio::test]
    async fn checked_entries_are_priced_and_persisted() {
        let store = InMemoryOrderStore::new();
        let cart = CartService::new(store.clone());
        let orders = OrderService::new(store.clone());

        cart.add_to_cart(USER, GoodsId::new(1), 2).await.unwrap();
        cart.add_to_cart(USER, GoodsId::new(2), 1).await.unwrap();
        cart.add_to_cart(USER, GoodsId::new(3), 9).await.unwrap();
        cart.update_cart_item(USER, GoodsId::new(1), 2, true)
            .await
            .unwrap();
        cart.update_cart_item(USER, GoodsId::new(2), 1, true)
            .await
            .unwrap();

        let selected = store.checked_cart_entries(USER).await.unwrap();
        assert_eq!(
            distinct_goods_ids(&selected),
            vec![GoodsId::new(1), GoodsId::new(2)]
        );

        let priced = price_selection(&selected, &catalog()).unwrap();
        assert_eq!(priced.total.to_string(), "25.00");

        let mut tx = store.begin().await.unwrap();
        let order = tx
            .insert_order(&NewOrder {
                order_sn: OrderSn::new("sn-checkout"),
                user_id: USER,
                address: "1 Main St".to_string(),
                signer_name: "Ann".to_string(),
                signer_mobile: "13800000000".to_string(),
                post: String::new(),
                total: priced.total,
            })
            .await
            .unwrap();
        tx.insert_line_items(&priced.line_items(order.id))
            .await
            .unwrap();
        let selected_ids: Vec<_> = priced.quantities().map(|(goods, _)| goods).collect();
        assert_eq!(
            tx.delete_checked_cart_entries(USER, &selected_ids)
                .await
                .unwrap(),
            2
        );
        tx.commit().await.unwrap();

        let detail = orders.order_detail(USER, order.id).await.unwrap();
        assert_eq!(detail.items.len(), 2);
        assert_eq!(
            detail.items.iter().map(|i| i.amount()).sum::<Money>(),
            detail.order.total
        );

        let remaining = cart.list_cart(USER).await.unwrap();
        assert_eq!(remaining.total, 1);
        assert_eq!(remaining.entries[0].goods_id, GoodsId::new(3));
    }
}

mod payment_status {
    use super::*;

    async fn seed(store: &InMemoryOrderStore, sn: &str) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&NewOrder {
            order_sn: OrderSn::new(sn),
            user_id: USER,
            address: "1 Main St".to_string(),
            signer_name: "Ann".to_string(),
            signer_mobile: "13800000000".to_string(),
            post: String::new(),
            total: Money::from_cents(100),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn paid_order_cannot_be_closed() {
        let store = InMemoryOrderStore::new();
        seed(&store, "sn-paid").await;
        let orders = OrderService::new(store);
        let sn = OrderSn::new("sn-paid");

        orders
            .update_order_status(&sn, OrderStatus::TradeSuccess)
            .await
            .unwrap();
        let err = orders
            .update_order_status(&sn, OrderStatus::TradeClosed)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn payment_waits_for_closing_transaction() {
        let store = InMemoryOrderStore::new();
        seed(&store, "sn-race").await;
        let orders = OrderService::new(store.clone());
        let sn = OrderSn::new("sn-race");

        // What the timeout handler does: lock the pending row, then close it.
        let mut closing = store.begin().await.unwrap();
        let order = closing
            .find_order_by_sn_for_update(&sn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        let (paid, ()) = tokio::join!(
            orders.update_order_status(&sn, OrderStatus::TradeSuccess),
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                closing
                    .update_order_status(order.id, OrderStatus::TradeClosed)
                    .await
                    .unwrap();
                closing.commit().await.unwrap();
            }
        );

        assert!(matches!(
            paid.unwrap_err(),
            DomainError::InvalidTransition {
                from: OrderStatus::TradeClosed,
                to: OrderStatus::TradeSuccess,
            }
        ));
        let stored = store.find_order_by_sn(&sn).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::TradeClosed);
    }

    #[tokio::test]
    async fn listing_reflects_status_updates() {
        let store = InMemoryOrderStore::new();
        seed(&store, "sn-a").await;
        seed(&store, "sn-b").await;
        let orders = OrderService::new(store);

        orders
            .update_order_status(&OrderSn::new("sn-a"), OrderStatus::TradeClosed)
            .await
            .unwrap();

        let page = orders
            .list_orders(OrderQuery::for_user(USER).per_page(1))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].order_sn.as_str(), "sn-b");

        let page = orders
            .list_orders(OrderQuery::for_user(USER).page(2).per_page(1))
            .await
            .unwrap();
        assert_eq!(page.items[0].status, OrderStatus::TradeClosed);
    }
}
