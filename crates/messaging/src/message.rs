use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{DelayLevel, Result};

/// Broker-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a new random message id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as it travels through the broker.
///
/// The body is opaque bytes; [`Message::json`] and [`Message::decode`]
/// cover the common case of a JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub body: Vec<u8>,
    /// Deferred delivery, if any.
    pub delay: Option<DelayLevel>,
    /// How many times consumers have asked for this message again.
    pub reconsume_times: u32,
    pub born_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message with a raw body.
    pub fn new(topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            body: body.into(),
            delay: None,
            reconsume_times: 0,
            born_at: Utc::now(),
        }
    }

    /// Creates a message whose body is `payload` serialized as JSON.
    pub fn json<T: Serialize>(topic: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(topic, serde_json::to_vec(payload)?))
    }

    /// Defers delivery by the given level.
    pub fn with_delay(mut self, level: DelayLevel) -> Self {
        self.delay = Some(level);
        self
    }

    /// Decodes the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
