//! API server entry point.

use messaging::{Broker, InMemoryBroker, PostgresBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use saga::topics;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::config::Config;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// In-memory broker that forgets what the workers have consumed.
async fn memory_broker(config: &Config) -> InMemoryBroker {
    let saga = config.saga_config();
    let broker = InMemoryBroker::new().with_retention(config.message_retention);
    broker
        .subscribe(topics::ORDER_GROUP, &saga.order_timeout_topic)
        .await;
    broker
        .subscribe(topics::INVENTORY_GROUP, &saga.stock_return_topic)
        .await;
    broker
}

async fn serve<S, B>(store: S, broker: B, config: Config, metrics_handle: PrometheusHandle)
where
    S: OrderStore + Clone + 'static,
    B: Broker + Clone + 'static,
{
    let state = api::create_default_state(store, broker, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = api::spawn_workers(&state, &config, shutdown_rx);

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "background worker panicked");
        }
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the store and broker, then serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to PostgreSQL");
            let store = PostgresOrderStore::new(pool.clone());
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("using PostgreSQL store and broker");

            serve(store, PostgresBroker::new(pool), config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, running in memory");
            let broker = memory_broker(&config).await;
            serve(InMemoryOrderStore::new(), broker, config, metrics_handle).await;
        }
    }
}
