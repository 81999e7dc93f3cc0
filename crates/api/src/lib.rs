//! HTTP API server for the order service.
//!
//! Exposes order creation (the transactional saga), order queries, payment
//! status updates and cart management, with structured logging (tracing)
//! and Prometheus metrics. Background workers consume order timeouts and
//! stock returns and resolve unacknowledged half messages.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use domain::{CartService, OrderService};
use messaging::{Broker, Consumer, ConsumerConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use saga::{
    InMemoryCatalog, InMemoryInventory, OrderOrchestrator, OrderTransactionListener,
    StockReleaseRelay, TimeoutCompensator, topics,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, B>(state: Arc<AppState<S, B>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create::<S, B>).get(routes::orders::list::<S, B>),
        )
        .route(
            "/orders/{order_sn}/status",
            patch(routes::orders::update_status::<S, B>),
        )
        .route(
            "/users/{user_id}/orders/{id}",
            get(routes::orders::detail::<S, B>),
        )
        .route(
            "/users/{user_id}/cart",
            get(routes::cart::list::<S, B>).post(routes::cart::add::<S, B>),
        )
        .route(
            "/users/{user_id}/cart/{goods_id}",
            patch(routes::cart::update::<S, B>).delete(routes::cart::delete::<S, B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over the given store and broker, with
/// empty in-memory catalog and inventory services.
pub fn create_default_state<S, B>(store: S, broker: B, config: &Config) -> Arc<AppState<S, B>>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let catalog = InMemoryCatalog::new();
    let inventory = InMemoryInventory::new();
    let saga_config = config.saga_config();

    let listener = OrderTransactionListener::new(
        store.clone(),
        catalog.clone(),
        inventory.clone(),
        broker.clone(),
        saga_config.clone(),
    );
    let orchestrator = OrderOrchestrator::new(broker.clone(), listener, config.check_config());

    Arc::new(AppState {
        cart_service: CartService::new(store.clone()),
        order_service: OrderService::new(store.clone()),
        store,
        broker,
        orchestrator,
        catalog,
        inventory,
        saga_config,
    })
}

/// Starts the timeout consumer, the stock-release relay and the check-back
/// loop. Each stops once `shutdown` flips to `true`.
pub fn spawn_workers<S, B>(
    state: &AppState<S, B>,
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let saga = &state.saga_config;

    let timeouts = Consumer::new(
        state.broker.clone(),
        TimeoutCompensator::new(
            state.store.clone(),
            state.broker.clone(),
            &saga.stock_return_topic,
        ),
        ConsumerConfig::new(topics::ORDER_GROUP, &saga.order_timeout_topic)
            .max_reconsume(config.consumer_max_reconsume)
            .poll_interval(config.consumer_poll_interval),
    );
    let relay = Consumer::new(
        state.broker.clone(),
        StockReleaseRelay::new(state.inventory.clone(), saga.inventory_timeout),
        ConsumerConfig::new(topics::INVENTORY_GROUP, &saga.stock_return_topic)
            .max_reconsume(config.consumer_max_reconsume)
            .poll_interval(config.consumer_poll_interval),
    );

    vec![
        timeouts.spawn(shutdown.clone()),
        relay.spawn(shutdown.clone()),
        state
            .orchestrator
            .producer()
            .spawn_checker(config.tx_check_interval, shutdown),
    ]
}
