use common::{GoodsId, Money, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{CartService, GoodsInfo, distinct_goods_ids, generate_order_sn, price_selection};
use order_store::{CartEntry, InMemoryOrderStore};

fn make_selection(size: i32) -> (Vec<CartEntry>, Vec<GoodsInfo>) {
    let entries = (1..=size)
        .map(|i| CartEntry {
            id: i64::from(i),
            user_id: UserId::new(1),
            goods_id: GoodsId::new(i),
            quantity: 2,
            checked: true,
        })
        .collect();
    let goods = (1..=size)
        .map(|i| GoodsInfo {
            id: GoodsId::new(i),
            name: format!("goods-{i}"),
            price: Money::from_cents(i64::from(i) * 100),
            image: format!("{i}.png"),
        })
        .collect();
    (entries, goods)
}

fn bench_price_selection(c: &mut Criterion) {
    let (entries, goods) = make_selection(100);

    c.bench_function("domain/price_selection_100", |b| {
        b.iter(|| {
            let ids = distinct_goods_ids(&entries);
            assert_eq!(ids.len(), 100);
            price_selection(&entries, &goods).unwrap()
        });
    });
}

fn bench_generate_order_sn(c: &mut Criterion) {
    c.bench_function("domain/generate_order_sn", |b| {
        b.iter(|| generate_order_sn(UserId::new(42)));
    });
}

fn bench_add_to_cart(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cart = CartService::new(InMemoryOrderStore::new());

    c.bench_function("domain/add_to_cart_merge", |b| {
        b.iter(|| {
            rt.block_on(async {
                cart.add_to_cart(UserId::new(1), GoodsId::new(1), 1)
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_price_selection,
    bench_generate_order_sn,
    bench_add_to_cart
);
criterion_main!(benches);
