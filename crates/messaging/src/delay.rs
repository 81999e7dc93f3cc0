//! Broker delay levels.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{MessagingError, Result};

/// Delay per level, in seconds: 1s 5s 10s 30s 1m 2m 3m 4m 5m 6m 7m 8m 9m 10m 20m 30m 1h 2h.
const LEVEL_SECS: [u64; 18] = [
    1, 5, 10, 30, 60, 120, 180, 240, 300, 360, 420, 480, 540, 600, 1200, 1800, 3600, 7200,
];

/// A broker delay level.
///
/// Delayed messages are not delivered at an arbitrary instant but on one of
/// eighteen fixed levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DelayLevel(u8);

impl DelayLevel {
    /// Shortest delay (1 second).
    pub const MIN: DelayLevel = DelayLevel(1);

    /// Longest delay (2 hours).
    pub const MAX: DelayLevel = DelayLevel(18);

    /// Thirty minutes (level 16).
    pub const THIRTY_MINUTES: DelayLevel = DelayLevel(16);

    /// Creates a delay level, rejecting anything outside 1..=18.
    pub fn new(level: u8) -> Result<Self> {
        if (1..=18).contains(&level) {
            Ok(Self(level))
        } else {
            Err(MessagingError::InvalidDelayLevel(level))
        }
    }

    /// Backoff level used when a consumer asks for redelivery for the
    /// `reconsume_times`-th time: level 3 (10s) for the first retry, one
    /// level longer for each retry after that, capped at the longest level.
    pub fn for_retry(reconsume_times: u32) -> Self {
        let level = 3u32.saturating_add(reconsume_times).min(18);
        Self(level as u8)
    }

    /// Returns the raw level.
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Returns how long delivery is deferred.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(LEVEL_SECS[usize::from(self.0 - 1)])
    }
}

impl TryFrom<u8> for DelayLevel {
    type Error = MessagingError;

    fn try_from(level: u8) -> Result<Self> {
        Self::new(level)
    }
}

impl From<DelayLevel> for u8 {
    fn from(level: DelayLevel) -> Self {
        level.0
    }
}

impl std::fmt::Display for DelayLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "level {} ({:?})", self.0, self.duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder() {
        assert_eq!(DelayLevel::MIN.duration(), Duration::from_secs(1));
        assert_eq!(DelayLevel::new(3).unwrap().duration(), Duration::from_secs(10));
        assert_eq!(DelayLevel::new(16).unwrap().duration(), Duration::from_secs(30 * 60));
        assert_eq!(DelayLevel::MAX.duration(), Duration::from_secs(2 * 60 * 60));
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            DelayLevel::new(0),
            Err(MessagingError::InvalidDelayLevel(0))
        ));
        assert!(DelayLevel::new(19).is_err());
        assert!(serde_json::from_str::<DelayLevel>("42").is_err());
    }

    #[test]
    fn test_retry_backoff() {
        assert_eq!(DelayLevel::for_retry(0).get(), 3);
        assert_eq!(DelayLevel::for_retry(4).get(), 7);
        assert_eq!(DelayLevel::for_retry(100).get(), 18);
    }
}
