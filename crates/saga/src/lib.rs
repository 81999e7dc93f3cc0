//! Transactional order-creation saga.
//!
//! Creating an order touches three owners of state: the local order store,
//! the inventory service and the broker. There is no shared transaction
//! coordinator, so the saga is built on a half message:
//!
//! 1. the orchestrator stores an order-created half message on the broker;
//! 2. the executor prices the cart, deducts stock, and writes the order,
//!    its line items and the cart cleanup in one local transaction, together
//!    with a delayed order-timeout message;
//! 3. the half message is committed or rolled back to match.
//!
//! If the outcome of step 2 is lost, the broker checks back and the order
//! row decides. When the timeout fires for an order that was never paid, the
//! compensator closes it and sends a stock return.

pub mod clients;
pub mod compensator;
pub mod config;
pub mod error;
pub mod executor;
pub mod messages;
pub mod orchestrator;
pub mod relay;
pub mod topics;

pub use clients::{
    CatalogClient, ClientError, InMemoryCatalog, InMemoryInventory, InventoryClient, StockLine,
};
pub use compensator::TimeoutCompensator;
pub use config::SagaConfig;
pub use error::{Result, SagaError};
pub use executor::{CreatedOrder, OrderTransactionListener};
pub use messages::{OrderDraft, OrderTimeout, StockReturn};
pub use orchestrator::{CreateOrderRequest, OrderOrchestrator, OrderProducer};
pub use relay::StockReleaseRelay;
