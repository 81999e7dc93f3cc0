use common::{GoodsId, Money, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::GoodsInfo;
use messaging::{CheckConfig, InMemoryBroker};
use order_store::InMemoryOrderStore;
use saga::{
    CreateOrderRequest, InMemoryCatalog, InMemoryInventory, OrderOrchestrator,
    OrderTransactionListener, SagaConfig,
};

fn bench_create_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let store = InMemoryOrderStore::new();
    let catalog = InMemoryCatalog::new();
    let inventory = InMemoryInventory::new();
    let broker = InMemoryBroker::new();

    rt.block_on(async {
        for i in 1..=5 {
            catalog
                .put(GoodsInfo {
                    id: GoodsId::new(i),
                    name: format!("goods-{i}"),
                    price: Money::from_cents(i64::from(i) * 100),
                    image: format!("{i}.png"),
                })
                .await;
            inventory.set_stock(GoodsId::new(i), u32::MAX).await;
        }
    });

    let listener = OrderTransactionListener::new(
        store.clone(),
        catalog,
        inventory,
        broker.clone(),
        SagaConfig::default(),
    );
    let orchestrator = OrderOrchestrator::new(broker, listener, CheckConfig::default());
    let user = UserId::new(1);

    c.bench_function("saga/create_order_5_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                for i in 1..=5 {
                    store.put_cart_entry(user, GoodsId::new(i), 1, true).await;
                }
                orchestrator
                    .create_order(CreateOrderRequest {
                        user_id: user,
                        address: "1 Main St".to_string(),
                        signer_name: "Sam".to_string(),
                        signer_mobile: "555-0100".to_string(),
                        post: "standard".to_string(),
                    })
                    .await
                    .unwrap()
            })
        });
    });
}

criterion_group!(benches, bench_create_order);
criterion_main!(benches);
