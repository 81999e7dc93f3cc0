use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    DelayLevel, HalfMessage, LocalTransactionState, Message, MessageId, MessagingError, Result,
    RetryOutcome, broker::Broker, dead_letter_topic,
};

/// How long a polled message stays hidden from its group before redelivery.
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

const MESSAGE_COLUMNS: &str = "id, topic, body, delay_level, reconsume_times, born_at";

/// PostgreSQL-backed broker.
///
/// Shares the database with the order store, so a single deployment needs
/// no external broker. Timestamps for delivery and leases come from the
/// database clock.
#[derive(Clone)]
pub struct PostgresBroker {
    pool: PgPool,
    lease: Duration,
}

impl PostgresBroker {
    /// Creates a new PostgreSQL broker.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    /// Sets how long a polled, unacknowledged message stays hidden.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(
        &self,
        executor: impl sqlx::PgExecutor<'_>,
        message: &Message,
        state: &str,
        group: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mq_messages
                (id, topic, body, delay_level, reconsume_times, born_at, state, deliver_at, group_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW() + make_interval(secs => $8::DOUBLE PRECISION), $9)
            "#,
        )
        .bind(message.id.as_uuid())
        .bind(&message.topic)
        .bind(&message.body)
        .bind(message.delay.map(|d| i16::from(d.get())))
        .bind(message.reconsume_times as i32)
        .bind(message.born_at)
        .bind(state)
        .bind(delay_secs(message.delay))
        .bind(group)
        .execute(executor)
        .await?;
        Ok(())
    }
}

fn delay_secs(delay: Option<DelayLevel>) -> f64 {
    delay.map(|d| d.duration().as_secs_f64()).unwrap_or(0.0)
}

fn row_to_message(row: PgRow) -> Result<Message> {
    let delay = row
        .try_get::<Option<i16>, _>("delay_level")?
        .map(|level| DelayLevel::new(level as u8))
        .transpose()?;

    Ok(Message {
        id: MessageId::from_uuid(row.try_get("id")?),
        topic: row.try_get("topic")?,
        body: row.try_get("body")?,
        delay,
        reconsume_times: row.try_get::<i32, _>("reconsume_times")? as u32,
        born_at: row.try_get("born_at")?,
    })
}

#[async_trait]
impl Broker for PostgresBroker {
    async fn send(&self, message: Message) -> Result<MessageId> {
        self.insert(&self.pool, &message, "READY", None).await?;
        Ok(message.id)
    }

    async fn prepare(&self, message: Message) -> Result<MessageId> {
        self.insert(&self.pool, &message, "HALF", None).await?;
        Ok(message.id)
    }

    async fn end_transaction(&self, id: MessageId, state: LocalTransactionState) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT state, delay_level FROM mq_messages WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MessagingError::UnknownHalfMessage(id))?;
        let current: String = row.try_get("state")?;
        let delay = row
            .try_get::<Option<i16>, _>("delay_level")?
            .map(|level| DelayLevel::new(level as u8))
            .transpose()?;

        match (current.as_str(), state) {
            ("HALF", LocalTransactionState::Commit) => {
                sqlx::query(
                    r#"
                    UPDATE mq_messages
                    SET state = 'READY',
                        deliver_at = NOW() + make_interval(secs => $2::DOUBLE PRECISION)
                    WHERE id = $1
                    "#,
                )
                .bind(id.as_uuid())
                .bind(delay_secs(delay))
                .execute(&mut *tx)
                .await?;
            }
            ("HALF", LocalTransactionState::Rollback) => {
                sqlx::query("UPDATE mq_messages SET state = 'ROLLED_BACK' WHERE id = $1")
                    .bind(id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
            }
            ("HALF", LocalTransactionState::Unknown)
            | ("READY", LocalTransactionState::Commit)
            | ("ROLLED_BACK", LocalTransactionState::Rollback) => {}
            _ => return Err(MessagingError::UnknownHalfMessage(id)),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn unresolved(&self, older_than: Duration) -> Result<Vec<HalfMessage>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}, check_times
            FROM mq_messages
            WHERE state = 'HALF'
              AND born_at <= NOW() - make_interval(secs => $1::DOUBLE PRECISION)
            ORDER BY seq ASC
            "#
        ))
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<HalfMessage> {
                let check_times = row.try_get::<i32, _>("check_times")? as u32;
                Ok(HalfMessage {
                    message: row_to_message(row)?,
                    check_times,
                })
            })
            .collect()
    }

    async fn record_check(&self, id: MessageId) -> Result<u32> {
        let times: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE mq_messages SET check_times = check_times + 1
            WHERE id = $1 AND state = 'HALF'
            RETURNING check_times
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        times
            .map(|t| t as u32)
            .ok_or(MessagingError::UnknownHalfMessage(id))
    }

    async fn poll(&self, group: &str, topic: &str) -> Result<Option<Message>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT m.id, m.topic, m.body, m.delay_level, m.reconsume_times, m.born_at
            FROM mq_messages m
            WHERE m.topic = $1
              AND m.state = 'READY'
              AND m.deliver_at <= NOW()
              AND (m.group_name IS NULL OR m.group_name = $2)
              AND NOT EXISTS (
                  SELECT 1 FROM mq_deliveries d
                  WHERE d.group_name = $2
                    AND d.message_id = m.id
                    AND (d.acked OR d.leased_until > NOW())
              )
            ORDER BY m.seq ASC
            LIMIT 1
            FOR UPDATE OF m SKIP LOCKED
            "#,
        )
        .bind(topic)
        .bind(group)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let message = row_to_message(row)?;

        sqlx::query(
            r#"
            INSERT INTO mq_deliveries (group_name, message_id, leased_until)
            VALUES ($1, $2, NOW() + make_interval(secs => $3::DOUBLE PRECISION))
            ON CONFLICT (group_name, message_id) DO UPDATE SET leased_until = EXCLUDED.leased_until
            "#,
        )
        .bind(group)
        .bind(message.id.as_uuid())
        .bind(self.lease.as_secs_f64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(message))
    }

    async fn ack(&self, group: &str, id: MessageId) -> Result<()> {
        ack_in(&self.pool, group, id.as_uuid()).await
    }

    async fn retry_later(
        &self,
        group: &str,
        message: &Message,
        max_reconsume: u32,
    ) -> Result<RetryOutcome> {
        let mut tx = self.pool.begin().await?;
        ack_in(&mut *tx, group, message.id.as_uuid()).await?;

        let outcome = if message.reconsume_times >= max_reconsume {
            let mut dead = message.clone();
            dead.id = MessageId::new();
            dead.topic = dead_letter_topic(group);
            dead.delay = None;
            self.insert(&mut *tx, &dead, "READY", Some(group)).await?;
            RetryOutcome::DeadLettered
        } else {
            let level = DelayLevel::for_retry(message.reconsume_times);
            let mut retry = message.clone();
            retry.id = MessageId::new();
            retry.reconsume_times += 1;
            retry.delay = Some(level);
            self.insert(&mut *tx, &retry, "READY", Some(group)).await?;
            RetryOutcome::Scheduled(level)
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

async fn ack_in(executor: impl sqlx::PgExecutor<'_>, group: &str, id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mq_deliveries (group_name, message_id, acked, leased_until)
        VALUES ($1, $2, TRUE, NOW())
        ON CONFLICT (group_name, message_id) DO UPDATE SET acked = TRUE
        "#,
    )
    .bind(group)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}
