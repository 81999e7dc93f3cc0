//! Shared application state.

use domain::{CartService, OrderService};
use messaging::Broker;
use order_store::OrderStore;
use saga::{InMemoryCatalog, InMemoryInventory, OrderOrchestrator, SagaConfig};

/// Orchestrator wired to the in-process catalog and inventory.
pub type Orchestrator<S, B> = OrderOrchestrator<S, InMemoryCatalog, InMemoryInventory, B>;

/// Shared application state accessible from all handlers.
///
/// The catalog and inventory services are owned by other teams; this
/// process talks to in-memory stand-ins for both.
pub struct AppState<S: OrderStore, B: Broker> {
    pub store: S,
    pub broker: B,
    pub cart_service: CartService<S>,
    pub order_service: OrderService<S>,
    pub orchestrator: Orchestrator<S, B>,
    pub catalog: InMemoryCatalog,
    pub inventory: InMemoryInventory,
    pub saga_config: SagaConfig,
}
