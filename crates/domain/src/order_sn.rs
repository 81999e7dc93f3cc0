//! Order number generation.

use chrono::{DateTime, Datelike, Timelike, Utc};
use common::{OrderSn, UserId};
use rand::Rng;

/// Generates a fresh order number for `user_id` from the current time.
///
/// Uniqueness comes from the nanosecond component, the user id and a
/// random two-digit suffix; the store's unique constraint on the order
/// number is the final guard.
pub fn generate_order_sn(user_id: UserId) -> OrderSn {
    let suffix = rand::thread_rng().gen_range(10..=99);
    format_order_sn(Utc::now(), user_id, suffix)
}

/// Formats `YYYYMMDDHHMM` + nanoseconds + user id + suffix.
pub fn format_order_sn(at: DateTime<Utc>, user_id: UserId, suffix: u8) -> OrderSn {
    OrderSn::new(format!(
        "{:04}{:02}{:02}{:02}{:02}{}{}{}",
        at.year(),
        at.month(),
        at.day(),
        at.hour(),
        at.minute(),
        at.nanosecond(),
        user_id,
        suffix
    ))
}
