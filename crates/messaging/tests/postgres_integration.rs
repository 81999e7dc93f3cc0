//! PostgreSQL broker integration tests
//!
//! These tests share one PostgreSQL container and truncate the broker
//! tables before each test, so they run serially.
//!
//! ```bash
//! cargo test -p messaging --test postgres_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use messaging::{
    Broker, DelayLevel, LocalTransactionState, Message, MessagingError, PostgresBroker,
    RetryOutcome,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/002_create_message_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_broker() -> PostgresBroker {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE mq_deliveries, mq_messages")
        .execute(&pool)
        .await
        .unwrap();

    PostgresBroker::new(pool)
}

#[tokio::test]
#[serial]
async fn send_poll_ack() {
    let broker = get_test_broker().await;
    let id = broker
        .send(Message::new("order_reback", b"{}".to_vec()))
        .await
        .unwrap();

    let msg = broker.poll("inventory", "order_reback").await.unwrap().unwrap();
    assert_eq!(msg.id, id);
    assert_eq!(msg.body, b"{}".to_vec());

    broker.ack("inventory", id).await.unwrap();
    assert!(
        broker
            .poll("inventory", "order_reback")
            .await
            .unwrap()
            .is_none()
    );

    // Another group still sees it.
    assert!(broker.poll("audit", "order_reback").await.unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn delayed_message_is_not_delivered_early() {
    let broker = get_test_broker().await;
    broker
        .send(Message::new("order_timeout", b"{}".to_vec()).with_delay(DelayLevel::MAX))
        .await
        .unwrap();

    assert!(broker.poll("order", "order_timeout").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn half_message_lifecycle() {
    let broker = get_test_broker().await;
    let committed = broker
        .prepare(Message::new("order_created", b"a".to_vec()))
        .await
        .unwrap();
    let rolled_back = broker
        .prepare(Message::new("order_created", b"b".to_vec()))
        .await
        .unwrap();

    assert!(broker.poll("g", "order_created").await.unwrap().is_none());
    assert_eq!(broker.unresolved(Duration::ZERO).await.unwrap().len(), 2);

    broker
        .end_transaction(committed, LocalTransactionState::Commit)
        .await
        .unwrap();
    broker
        .end_transaction(rolled_back, LocalTransactionState::Rollback)
        .await
        .unwrap();

    let msg = broker.poll("g", "order_created").await.unwrap().unwrap();
    assert_eq!(msg.id, committed);
    broker.ack("g", msg.id).await.unwrap();
    assert!(broker.poll("g", "order_created").await.unwrap().is_none());
    assert!(broker.unresolved(Duration::ZERO).await.unwrap().is_empty());

    let err = broker
        .end_transaction(rolled_back, LocalTransactionState::Commit)
        .await
        .unwrap_err();
    assert!(matches!(err, MessagingError::UnknownHalfMessage(_)));
}

#[tokio::test]
#[serial]
async fn record_check_counts() {
    let broker = get_test_broker().await;
    let id = broker
        .prepare(Message::new("order_created", b"a".to_vec()))
        .await
        .unwrap();

    assert_eq!(broker.record_check(id).await.unwrap(), 1);
    assert_eq!(broker.record_check(id).await.unwrap(), 2);

    let pending = broker.unresolved(Duration::ZERO).await.unwrap();
    assert_eq!(pending[0].check_times, 2);
}

#[tokio::test]
#[serial]
async fn retry_later_schedules_then_dead_letters() {
    let broker = get_test_broker().await;
    broker
        .send(Message::new("order_timeout", b"x".to_vec()))
        .await
        .unwrap();

    let msg = broker.poll("order", "order_timeout").await.unwrap().unwrap();
    let outcome = broker.retry_later("order", &msg, 16).await.unwrap();
    assert_eq!(outcome, RetryOutcome::Scheduled(DelayLevel::new(3).unwrap()));

    // The retry copy is delayed and the original is consumed.
    assert!(broker.poll("order", "order_timeout").await.unwrap().is_none());

    let mut exhausted = msg.clone();
    exhausted.reconsume_times = 16;
    let outcome = broker.retry_later("order", &exhausted, 16).await.unwrap();
    assert_eq!(outcome, RetryOutcome::DeadLettered);

    let dead = broker.poll("order", "%DLQ%order").await.unwrap().unwrap();
    assert_eq!(dead.body, b"x".to_vec());
}

#[tokio::test]
#[serial]
async fn lease_hides_message_from_same_group() {
    let broker = get_test_broker().await.with_lease(Duration::from_secs(60));
    broker
        .send(Message::new("t", b"x".to_vec()))
        .await
        .unwrap();

    assert!(broker.poll("g", "t").await.unwrap().is_some());
    assert!(broker.poll("g", "t").await.unwrap().is_none());
}
