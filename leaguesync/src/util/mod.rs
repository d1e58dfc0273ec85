//! Shared utilities.

mod time;

pub use time::{backup_stamp, parse_marker_date, Timestamp};
