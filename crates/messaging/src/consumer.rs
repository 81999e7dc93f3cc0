//! Pull consumer with retry and dead-lettering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{Message, Result, RetryOutcome, broker::Broker};

/// Verdict of a message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumeResult {
    /// The message is done with.
    Success,
    /// Deliver the message again after a backoff.
    RetryLater,
}

impl ConsumeResult {
    /// Returns the result as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumeResult::Success => "success",
            ConsumeResult::RetryLater => "retry_later",
        }
    }
}

/// Processes messages of one topic.
///
/// Delivery is at-least-once, so handlers must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> ConsumeResult;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(&self, message: &Message) -> ConsumeResult {
        (**self).handle(message).await
    }
}

/// Consumer group subscription settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group: String,
    pub topic: String,
    /// Redeliveries before a message is dead-lettered.
    pub max_reconsume: u32,
    /// Pause between polls when the topic is drained.
    pub poll_interval: Duration,
}

impl ConsumerConfig {
    /// Creates a subscription with default retry and polling settings.
    pub fn new(group: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            topic: topic.into(),
            max_reconsume: 16,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn max_reconsume(mut self, max_reconsume: u32) -> Self {
        self.max_reconsume = max_reconsume;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Feeds messages of one topic to a handler on behalf of a consumer group.
pub struct Consumer<B: Broker, H: MessageHandler> {
    broker: B,
    handler: H,
    config: ConsumerConfig,
}

impl<B: Broker, H: MessageHandler> Consumer<B, H> {
    pub fn new(broker: B, handler: H, config: ConsumerConfig) -> Self {
        Self {
            broker,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Handles at most one message. Returns `None` when nothing is deliverable.
    #[tracing::instrument(skip(self), fields(group = %self.config.group, topic = %self.config.topic))]
    pub async fn run_once(&self) -> Result<Option<ConsumeResult>> {
        let Some(message) = self
            .broker
            .poll(&self.config.group, &self.config.topic)
            .await?
        else {
            return Ok(None);
        };

        let result = self.handler.handle(&message).await;
        metrics::counter!(
            "messages_consumed_total",
            "topic" => self.config.topic.clone(),
            "result" => result.as_str()
        )
        .increment(1);

        match result {
            ConsumeResult::Success => {
                self.broker.ack(&self.config.group, message.id).await?;
            }
            ConsumeResult::RetryLater => {
                let outcome = self
                    .broker
                    .retry_later(&self.config.group, &message, self.config.max_reconsume)
                    .await?;
                match outcome {
                    RetryOutcome::Scheduled(level) => tracing::info!(
                        message_id = %message.id,
                        reconsume_times = message.reconsume_times,
                        delay = %level,
                        "message scheduled for redelivery"
                    ),
                    RetryOutcome::DeadLettered => tracing::error!(
                        message_id = %message.id,
                        reconsume_times = message.reconsume_times,
                        "retry budget exhausted, message dead-lettered"
                    ),
                }
            }
        }

        Ok(Some(result))
    }

    /// Handles messages until none is deliverable. Returns how many were handled.
    pub async fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while self.run_once().await?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }
}

impl<B, H> Consumer<B, H>
where
    B: Broker + 'static,
    H: MessageHandler + 'static,
{
    /// Polls in the background until `shutdown` flips to `true`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(group = %self.config.group, topic = %self.config.topic, "consumer started");
            loop {
                if let Err(e) = self.drain().await {
                    tracing::error!(error = %e, topic = %self.config.topic, "consumer poll failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(topic = %self.config.topic, "consumer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::InMemoryBroker;

    /// Fails the first `failures` deliveries, then succeeds.
    struct Flaky {
        failures: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        async fn handle(&self, _message: &Message) -> ConsumeResult {
            if self.seen.fetch_add(1, Ordering::SeqCst) < self.failures {
                ConsumeResult::RetryLater
            } else {
                ConsumeResult::Success
            }
        }
    }

    fn consumer(
        broker: &InMemoryBroker,
        failures: usize,
        max: u32,
    ) -> Consumer<InMemoryBroker, Flaky> {
        Consumer::new(
            broker.clone(),
            Flaky {
                failures,
                seen: AtomicUsize::new(0),
            },
            ConsumerConfig::new("g", "t").max_reconsume(max),
        )
    }

    #[tokio::test]
    async fn test_success_acks() {
        let broker = InMemoryBroker::new();
        broker.send(Message::new("t", b"x".to_vec())).await.unwrap();
        let consumer = consumer(&broker, 0, 16);

        assert_eq!(consumer.run_once().await.unwrap(), Some(ConsumeResult::Success));
        assert_eq!(consumer.run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retry_later_redelivers_after_backoff() {
        let broker = InMemoryBroker::new();
        broker.send(Message::new("t", b"x".to_vec())).await.unwrap();
        let consumer = consumer(&broker, 1, 16);

        assert_eq!(
            consumer.run_once().await.unwrap(),
            Some(ConsumeResult::RetryLater)
        );
        assert_eq!(consumer.drain().await.unwrap(), 0);

        broker.advance(Duration::from_secs(10));
        assert_eq!(consumer.run_once().await.unwrap(), Some(ConsumeResult::Success));
        assert!(broker.dead_letters("g").await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let broker = InMemoryBroker::new();
        broker.send(Message::new("t", b"x".to_vec())).await.unwrap();
        let consumer = consumer(&broker, usize::MAX, 2);

        for _ in 0..3 {
            assert_eq!(
                consumer.run_once().await.unwrap(),
                Some(ConsumeResult::RetryLater)
            );
            broker.advance(Duration::from_secs(3600));
        }

        assert_eq!(consumer.run_once().await.unwrap(), None);
        let dead = broker.dead_letters("g").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reconsume_times, 2);
    }

    #[tokio::test]
    async fn test_spawned_consumer_drains_and_stops() {
        let broker = InMemoryBroker::new();
        broker.send(Message::new("t", b"x".to_vec())).await.unwrap();
        let handler = Arc::new(Flaky {
            failures: 0,
            seen: AtomicUsize::new(0),
        });
        let consumer = Consumer::new(
            broker.clone(),
            handler.clone(),
            ConsumerConfig::new("g", "t").poll_interval(Duration::from_millis(5)),
        );
        let (tx, rx) = watch::channel(false);

        let handle = consumer.spawn(rx);
        for _ in 0..100 {
            if handler.seen.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }
}
