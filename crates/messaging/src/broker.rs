use std::time::Duration;

use async_trait::async_trait;

use crate::{DelayLevel, LocalTransactionState, Message, MessageId, Result};

/// Returns the dead-letter topic of a consumer group.
pub fn dead_letter_topic(group: &str) -> String {
    format!("%DLQ%{group}")
}

/// A half message the broker has not been able to resolve yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalfMessage {
    pub message: Message,
    /// Check-backs already issued for this message.
    pub check_times: u32,
}

/// What happened to a message a consumer asked to see again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Redelivery is scheduled after the given delay.
    Scheduled(DelayLevel),
    /// The retry budget is exhausted; the message went to the group's dead-letter topic.
    DeadLettered,
}

/// Storage and delivery port of a message broker.
///
/// Delivery is at-least-once per consumer group: every group subscribed to a
/// topic sees every committed message of that topic, and a message polled but
/// never acknowledged becomes visible to the group again once its lease expires.
///
/// Half messages (see [`Broker::prepare`]) are invisible to consumers until
/// [`Broker::end_transaction`] commits them.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes a message, honouring its delay level.
    async fn send(&self, message: Message) -> Result<MessageId>;

    /// Stores a half message.
    async fn prepare(&self, message: Message) -> Result<MessageId>;

    /// Resolves a half message. `Commit` publishes it, `Rollback` discards it
    /// and `Unknown` leaves it for a later check-back.
    async fn end_transaction(&self, id: MessageId, state: LocalTransactionState) -> Result<()>;

    /// Returns half messages older than `older_than` that are still unresolved.
    async fn unresolved(&self, older_than: Duration) -> Result<Vec<HalfMessage>>;

    /// Counts one more check-back for a half message and returns the new count.
    async fn record_check(&self, id: MessageId) -> Result<u32>;

    /// Takes the next deliverable message of `topic` for `group`, if any.
    async fn poll(&self, group: &str, topic: &str) -> Result<Option<Message>>;

    /// Marks a polled message as consumed by `group`.
    async fn ack(&self, group: &str, id: MessageId) -> Result<()>;

    /// Consumes `message` for `group` and schedules a copy with one more
    /// reconsume, or dead-letters it once `max_reconsume` is reached.
    async fn retry_later(
        &self,
        group: &str,
        message: &Message,
        max_reconsume: u32,
    ) -> Result<RetryOutcome>;
}
