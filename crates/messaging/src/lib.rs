//! Message broker abstractions for the order service.
//!
//! This crate provides:
//! - [`Broker`]: storage and delivery port with delay levels, half messages,
//!   consumer groups, retries and dead-lettering
//! - [`TransactionProducer`] / [`TransactionListener`]: half-message sends
//!   bound to a local transaction, with check-back of unresolved sends
//! - [`Consumer`] / [`MessageHandler`]: pull consumers with retry-later semantics
//! - In-memory and PostgreSQL broker implementations

pub mod broker;
pub mod consumer;
pub mod delay;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod transaction;

pub use broker::{Broker, HalfMessage, RetryOutcome, dead_letter_topic};
pub use consumer::{ConsumeResult, Consumer, ConsumerConfig, MessageHandler};
pub use delay::DelayLevel;
pub use error::{MessagingError, Result};
pub use memory::InMemoryBroker;
pub use message::{Message, MessageId};
pub use postgres::PostgresBroker;
pub use transaction::{
    CheckConfig, CheckReport, LocalTransactionState, TransactionListener, TransactionProducer,
    TransactionSendResult,
};
