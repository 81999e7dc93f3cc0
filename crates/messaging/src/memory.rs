use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    DelayLevel, HalfMessage, LocalTransactionState, Message, MessageId, MessagingError, Result,
    RetryOutcome, broker::Broker, dead_letter_topic,
};

/// How long a polled message stays hidden from its group before redelivery.
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageState {
    Half,
    Ready,
    RolledBack,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    state: MessageState,
    deliver_at: DateTime<Utc>,
    /// Retry copies and dead letters belong to a single group.
    group: Option<String>,
    check_times: u32,
}

#[derive(Debug, Clone, Copy)]
enum Delivery {
    Leased(DateTime<Utc>),
    Acked,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<StoredMessage>,
    deliveries: HashMap<(String, MessageId), Delivery>,
    /// Groups per topic whose acks release a message.
    subscriptions: HashMap<String, HashSet<String>>,
}

impl State {
    fn acked(&self, group: &str, id: MessageId) -> bool {
        matches!(
            self.deliveries.get(&(group.to_string(), id)),
            Some(Delivery::Acked)
        )
    }

    /// Drops message `id` once every group that can consume it has acked it.
    /// Messages on topics nobody subscribed to are kept.
    fn release(&mut self, id: MessageId) {
        let Some(pos) = self.messages.iter().position(|m| m.message.id == id) else {
            return;
        };
        let stored = &self.messages[pos];
        let done = match &stored.group {
            Some(owner) => self.acked(owner, id),
            None => self
                .subscriptions
                .get(&stored.message.topic)
                .is_some_and(|groups| groups.iter().all(|g| self.acked(g, id))),
        };
        if done {
            self.messages.remove(pos);
            self.deliveries.retain(|(_, m), _| *m != id);
        }
    }

    /// Drops delivered messages and rolled-back halves older than `cutoff`.
    /// Unresolved half messages always stay.
    fn expire(&mut self, cutoff: DateTime<Utc>) {
        let before = self.messages.len();
        self.messages.retain(|m| match m.state {
            MessageState::Half => true,
            MessageState::Ready => m.deliver_at > cutoff,
            MessageState::RolledBack => m.message.born_at > cutoff,
        });
        if self.messages.len() != before {
            let live: HashSet<MessageId> = self.messages.iter().map(|m| m.message.id).collect();
            self.deliveries.retain(|(_, id), _| live.contains(id));
        }
    }
}

/// In-memory broker for tests and single-process runs.
///
/// Time is the wall clock plus an offset moved by [`InMemoryBroker::advance`],
/// so delayed delivery, leases and check-back immunity can be exercised
/// without sleeping.
///
/// Nothing is forgotten by default. [`InMemoryBroker::subscribe`] lets acks
/// release messages and [`InMemoryBroker::with_retention`] bounds how long
/// any resolved message is kept, which long-running processes need.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<RwLock<State>>,
    clock_offset_ms: Arc<AtomicI64>,
    lease: Duration,
    retention: Option<Duration>,
    fail_send_topics: Arc<RwLock<HashSet<String>>>,
    fail_on_prepare: Arc<AtomicBool>,
    fail_on_end_transaction: Arc<AtomicBool>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            clock_offset_ms: Arc::new(AtomicI64::new(0)),
            lease: DEFAULT_LEASE,
            retention: None,
            fail_send_topics: Arc::new(RwLock::new(HashSet::new())),
            fail_on_prepare: Arc::new(AtomicBool::new(false)),
            fail_on_end_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets how long a polled, unacknowledged message stays hidden.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Drops delivered and rolled-back messages once they are older than `retention`.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Registers `group` as a consumer of `topic`. A message on `topic` is
    /// dropped as soon as every registered group has acked it.
    pub async fn subscribe(&self, group: &str, topic: &str) {
        self.state
            .write()
            .await
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .insert(group.to_string());
    }

    /// Returns how many messages the broker holds, in any state.
    pub async fn len(&self) -> usize {
        self.state.read().await.messages.len()
    }

    /// Returns whether the broker holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Moves the broker clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock_offset_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Current broker time.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.clock_offset_ms.load(Ordering::SeqCst))
    }

    /// Makes sends to `topic` fail (or succeed again).
    pub async fn set_fail_on_send(&self, topic: &str, fail: bool) {
        let mut topics = self.fail_send_topics.write().await;
        if fail {
            topics.insert(topic.to_string());
        } else {
            topics.remove(topic);
        }
    }

    /// Makes half-message sends fail.
    pub fn set_fail_on_prepare(&self, fail: bool) {
        self.fail_on_prepare.store(fail, Ordering::SeqCst);
    }

    /// Makes transaction resolution fail, leaving half messages unresolved.
    pub fn set_fail_on_end_transaction(&self, fail: bool) {
        self.fail_on_end_transaction.store(fail, Ordering::SeqCst);
    }

    /// Returns every committed message of `topic`, due or not, excluding
    /// group-private retry copies.
    pub async fn messages(&self, topic: &str) -> Vec<Message> {
        self.state
            .read()
            .await
            .messages
            .iter()
            .filter(|m| {
                m.state == MessageState::Ready && m.group.is_none() && m.message.topic == topic
            })
            .map(|m| m.message.clone())
            .collect()
    }

    /// Returns half messages still awaiting resolution.
    pub async fn half_messages(&self) -> Vec<Message> {
        self.with_state(MessageState::Half).await
    }

    /// Returns half messages that were rolled back.
    pub async fn rolled_back(&self) -> Vec<Message> {
        self.with_state(MessageState::RolledBack).await
    }

    /// Returns the messages dead-lettered by `group`.
    pub async fn dead_letters(&self, group: &str) -> Vec<Message> {
        let topic = dead_letter_topic(group);
        self.state
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.message.topic == topic)
            .map(|m| m.message.clone())
            .collect()
    }

    async fn with_state(&self, state: MessageState) -> Vec<Message> {
        self.state
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.state == state)
            .map(|m| m.message.clone())
            .collect()
    }

    /// Expires old messages before a new one is stored.
    fn expire(&self, state: &mut State) {
        if let Some(retention) = self.retention {
            let cutoff = self.now() - chrono::Duration::milliseconds(retention.as_millis() as i64);
            state.expire(cutoff);
        }
    }

    fn deliver_at(&self, delay: Option<DelayLevel>) -> DateTime<Utc> {
        let now = self.now();
        match delay {
            Some(level) => now + chrono::Duration::milliseconds(level.duration().as_millis() as i64),
            None => now,
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn send(&self, message: Message) -> Result<MessageId> {
        if self.fail_send_topics.read().await.contains(&message.topic) {
            return Err(MessagingError::Send(format!(
                "injected send failure on {}",
                message.topic
            )));
        }

        let id = message.id;
        let deliver_at = self.deliver_at(message.delay);
        let mut guard = self.state.write().await;
        self.expire(&mut guard);
        guard.messages.push(StoredMessage {
            message,
            state: MessageState::Ready,
            deliver_at,
            group: None,
            check_times: 0,
        });
        Ok(id)
    }

    async fn prepare(&self, message: Message) -> Result<MessageId> {
        if self.fail_on_prepare.load(Ordering::SeqCst) {
            return Err(MessagingError::Send("injected prepare failure".to_string()));
        }

        let id = message.id;
        let deliver_at = self.now();
        let mut guard = self.state.write().await;
        self.expire(&mut guard);
        guard.messages.push(StoredMessage {
            message,
            state: MessageState::Half,
            deliver_at,
            group: None,
            check_times: 0,
        });
        Ok(id)
    }

    async fn end_transaction(&self, id: MessageId, state: LocalTransactionState) -> Result<()> {
        if self.fail_on_end_transaction.load(Ordering::SeqCst) {
            return Err(MessagingError::Send(
                "injected end-transaction failure".to_string(),
            ));
        }

        let mut guard = self.state.write().await;
        let Some(stored) = guard.messages.iter_mut().find(|m| m.message.id == id) else {
            return Err(MessagingError::UnknownHalfMessage(id));
        };

        match (stored.state, state) {
            (MessageState::Half, LocalTransactionState::Commit) => {
                stored.state = MessageState::Ready;
                stored.deliver_at = self.deliver_at(stored.message.delay);
            }
            (MessageState::Half, LocalTransactionState::Rollback) => {
                stored.state = MessageState::RolledBack;
            }
            (MessageState::Half, LocalTransactionState::Unknown)
            | (MessageState::Ready, LocalTransactionState::Commit)
            | (MessageState::RolledBack, LocalTransactionState::Rollback) => {}
            _ => return Err(MessagingError::UnknownHalfMessage(id)),
        }
        Ok(())
    }

    async fn unresolved(&self, older_than: Duration) -> Result<Vec<HalfMessage>> {
        let cutoff = self.now() - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        Ok(self
            .state
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.state == MessageState::Half && m.message.born_at <= cutoff)
            .map(|m| HalfMessage {
                message: m.message.clone(),
                check_times: m.check_times,
            })
            .collect())
    }

    async fn record_check(&self, id: MessageId) -> Result<u32> {
        let mut guard = self.state.write().await;
        let stored = guard
            .messages
            .iter_mut()
            .find(|m| m.message.id == id && m.state == MessageState::Half)
            .ok_or(MessagingError::UnknownHalfMessage(id))?;
        stored.check_times += 1;
        Ok(stored.check_times)
    }

    async fn poll(&self, group: &str, topic: &str) -> Result<Option<Message>> {
        let now = self.now();
        let mut guard = self.state.write().await;
        let State {
            messages,
            deliveries,
            ..
        } = &mut *guard;

        let next = messages.iter().find(|m| {
            m.state == MessageState::Ready
                && m.message.topic == topic
                && m.deliver_at <= now
                && m.group.as_deref().is_none_or(|g| g == group)
                && match deliveries.get(&(group.to_string(), m.message.id)) {
                    None => true,
                    Some(Delivery::Leased(until)) => *until <= now,
                    Some(Delivery::Acked) => false,
                }
        });

        let Some(next) = next else {
            return Ok(None);
        };
        let message = next.message.clone();
        let until = now + chrono::Duration::milliseconds(self.lease.as_millis() as i64);
        deliveries.insert((group.to_string(), message.id), Delivery::Leased(until));
        Ok(Some(message))
    }

    async fn ack(&self, group: &str, id: MessageId) -> Result<()> {
        let mut guard = self.state.write().await;
        guard
            .deliveries
            .insert((group.to_string(), id), Delivery::Acked);
        guard.release(id);
        Ok(())
    }

    async fn retry_later(
        &self,
        group: &str,
        message: &Message,
        max_reconsume: u32,
    ) -> Result<RetryOutcome> {
        let now = self.now();
        let mut guard = self.state.write().await;
        guard
            .deliveries
            .insert((group.to_string(), message.id), Delivery::Acked);
        guard.release(message.id);
        self.expire(&mut guard);

        if message.reconsume_times >= max_reconsume {
            let mut dead = message.clone();
            dead.id = MessageId::new();
            dead.topic = dead_letter_topic(group);
            guard.messages.push(StoredMessage {
                message: dead,
                state: MessageState::Ready,
                deliver_at: now,
                group: Some(group.to_string()),
                check_times: 0,
            });
            return Ok(RetryOutcome::DeadLettered);
        }

        let level = DelayLevel::for_retry(message.reconsume_times);
        let mut retry = message.clone();
        retry.id = MessageId::new();
        retry.reconsume_times += 1;
        retry.delay = Some(level);
        guard.messages.push(StoredMessage {
            message: retry,
            state: MessageState::Ready,
            deliver_at: now + chrono::Duration::milliseconds(level.duration().as_millis() as i64),
            group: Some(group.to_string()),
            check_times: 0,
        });
        Ok(RetryOutcome::Scheduled(level))
    }
}
