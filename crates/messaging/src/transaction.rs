//! Transactional (half-message) producer.
//!
//! A transactional send runs in three steps:
//!
//! 1. the message is stored on the broker as a half message, invisible to consumers;
//! 2. the [`TransactionListener`] executes the local transaction and decides the
//!    message's fate;
//! 3. the producer reports that fate to the broker.
//!
//! If step 3 never happens (crash, network failure, `Unknown`), the broker's
//! half message stays unresolved and [`TransactionProducer::check_pending`]
//! asks the listener to re-derive the fate from local state.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{Message, MessageId, Result, broker::Broker};

/// Fate of a half message, decided by the local transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalTransactionState {
    /// Publish the message.
    Commit,
    /// Discard the message.
    Rollback,
    /// Not decided yet; the broker will check back later.
    Unknown,
}

impl LocalTransactionState {
    /// Returns the state as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalTransactionState::Commit => "commit",
            LocalTransactionState::Rollback => "rollback",
            LocalTransactionState::Unknown => "unknown",
        }
    }
}

/// Callbacks a [`TransactionProducer`] runs around a half message.
#[async_trait]
pub trait TransactionListener: Send + Sync {
    /// Per-send result handed back to the caller of
    /// [`TransactionProducer::send_in_transaction`].
    type Outcome: Send;

    /// Runs the local transaction for `message` and decides its fate.
    async fn execute_local_transaction(
        &self,
        message: &Message,
    ) -> (LocalTransactionState, Self::Outcome);

    /// Re-derives the fate of `message` from local state.
    ///
    /// Must be free of side effects and safe to call any number of times,
    /// including concurrently with `execute_local_transaction` for the same message.
    async fn check_local_transaction(&self, message: &Message) -> LocalTransactionState;
}

/// Result of one transactional send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSendResult<O> {
    pub message_id: MessageId,
    /// Fate reported by the listener.
    pub state: LocalTransactionState,
    /// Whether the broker acknowledged the fate.
    pub resolved: bool,
    pub outcome: O,
}

/// Check-back tuning.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Half messages younger than this are left alone.
    pub immunity: Duration,
    /// Check-backs after which a half message is rolled back.
    pub max_check_times: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            immunity: Duration::from_secs(6),
            max_check_times: 15,
        }
    }
}

/// Summary of one check-back pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub committed: usize,
    pub rolled_back: usize,
    pub unknown: usize,
    /// Half messages rolled back because they reached the check ceiling.
    pub abandoned: usize,
}

/// Producer that sends messages inside local transactions.
pub struct TransactionProducer<B: Broker, L: TransactionListener> {
    broker: B,
    listener: L,
    check: CheckConfig,
}

impl<B: Broker, L: TransactionListener> TransactionProducer<B, L> {
    /// Creates a producer with the default check-back configuration.
    pub fn new(broker: B, listener: L) -> Self {
        Self::with_check_config(broker, listener, CheckConfig::default())
    }

    /// Creates a producer with an explicit check-back configuration.
    pub fn with_check_config(broker: B, listener: L, check: CheckConfig) -> Self {
        Self {
            broker,
            listener,
            check,
        }
    }

    /// Returns the listener.
    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Returns the broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Sends `message` as a half message and runs the local transaction.
    ///
    /// Fails only if the half message cannot be stored, in which case the
    /// listener is never invoked. A failure to report the fate afterwards is
    /// logged and left to the check-back.
    #[tracing::instrument(skip(self, message), fields(message_id = %message.id, topic = %message.topic))]
    pub async fn send_in_transaction(
        &self,
        message: Message,
    ) -> Result<TransactionSendResult<L::Outcome>> {
        let message_id = self.broker.prepare(message.clone()).await?;

        let (state, outcome) = self.listener.execute_local_transaction(&message).await;

        let resolved = match self.broker.end_transaction(message_id, state).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, state = state.as_str(), "failed to end transaction, leaving it to check-back");
                false
            }
        };

        Ok(TransactionSendResult {
            message_id,
            state,
            resolved,
            outcome,
        })
    }

    /// Resolves unresolved half messages by asking the listener.
    #[tracing::instrument(skip(self))]
    pub async fn check_pending(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();

        for half in self.broker.unresolved(self.check.immunity).await? {
            let id = half.message.id;
            report.checked += 1;

            let times = self.broker.record_check(id).await?;
            if times > self.check.max_check_times {
                tracing::warn!(message_id = %id, times, "check-back ceiling reached, rolling back");
                self.broker
                    .end_transaction(id, LocalTransactionState::Rollback)
                    .await?;
                report.abandoned += 1;
                continue;
            }

            let state = self.listener.check_local_transaction(&half.message).await;
            metrics::counter!("tx_check_total", "state" => state.as_str()).increment(1);
            tracing::debug!(message_id = %id, times, state = state.as_str(), "checked half message");

            match state {
                LocalTransactionState::Commit => report.committed += 1,
                LocalTransactionState::Rollback => report.rolled_back += 1,
                LocalTransactionState::Unknown => {
                    report.unknown += 1;
                    continue;
                }
            }
            self.broker.end_transaction(id, state).await?;
        }

        Ok(report)
    }
}

impl<B, L> TransactionProducer<B, L>
where
    B: Broker + 'static,
    L: TransactionListener + 'static,
{
    /// Runs [`TransactionProducer::check_pending`] every `interval` until
    /// `shutdown` flips to `true`.
    pub fn spawn_checker(
        self: std::sync::Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.check_pending().await {
                            Ok(report) if report.checked > 0 => {
                                tracing::info!(?report, "check-back pass finished");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "check-back pass failed"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("transaction checker stopped");
        })
    }
}
