use serde::{Deserialize, Serialize};

macro_rules! int_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Wraps a raw identifier value.
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw identifier value.
            pub const fn get(&self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

int_id!(
    /// Identifier of a user, owned by the user service.
    UserId(i32)
);

int_id!(
    /// Identifier of a catalog item, owned by the goods service.
    GoodsId(i32)
);

int_id!(
    /// Row identifier of a persisted order, assigned by the store.
    OrderId(i64)
);

/// Globally unique, human-correlatable order number.
///
/// Assigned once when the draft order is built and never changed afterwards.
/// It is the idempotency key for stock deduction and for every consumer
/// that reacts to order messages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderSn(String);

impl OrderSn {
    /// Creates an order number from an already generated string.
    pub fn new(sn: impl Into<String>) -> Self {
        Self(sn.into())
    }

    /// Returns the order number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderSn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OrderSn {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderSn {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderSn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
