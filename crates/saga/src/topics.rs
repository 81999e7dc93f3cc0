//! Default topic and consumer-group names.

/// Half-message topic announcing a created order awaiting payment.
pub const ORDER_CREATED: &str = "order_created";

/// Delayed topic that fires when the payment window of an order closes.
pub const ORDER_TIMEOUT: &str = "order_timeout";

/// Compensation topic asking inventory to give reserved stock back.
pub const STOCK_RETURN: &str = "order_reback";

/// Consumer group of the order service.
pub const ORDER_GROUP: &str = "order";

/// Consumer group that relays stock returns to the inventory client.
pub const INVENTORY_GROUP: &str = "inventory";
