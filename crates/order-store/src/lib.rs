pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{GoodsId, Money, OrderId, OrderSn, UserId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryOrderStore, StoreFault};
pub use model::{CartEntry, MAX_QUANTITY, NewOrder, Order, OrderLineItem, OrderStatus};
pub use postgres::PostgresOrderStore;
pub use query::{OrderQuery, Page};
pub use store::{OrderStore, StoreTransaction};
