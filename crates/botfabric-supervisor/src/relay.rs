//! Unified operator log formatting.
//!
//! Operators observe the whole fleet through one stream on the supervisor's
//! stdout. Every line has the same shape regardless of origin:
//!
//! ```text
//! [2026-08-30 14:03:21] - [CameraManager] : mode switched to APRILTAG
//! ```

use botfabric_types::{LogLevel, LogRecord};
use chrono::Utc;

/// Wall-clock format used in the unified stream.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a relayed record, or `None` when there is nothing worth printing:
/// empty messages are discarded, and heartbeat-level records never belong
/// in the log stream.
pub fn relay_line(record: &LogRecord) -> Option<String> {
    if record.level == LogLevel::Heartbeat {
        return None;
    }
    let text = record.message.trim();
    if text.is_empty() {
        return None;
    }
    Some(format!(
        "[{}] - [{}] : {}",
        record.timestamp.format(TIMESTAMP_FORMAT),
        record.sender,
        text
    ))
}

/// Format one of the supervisor's own announcements, stamped now.
pub fn announce_line(sender: &str, text: &str) -> String {
    format!(
        "[{}] - [{}] : {}",
        Utc::now().format(TIMESTAMP_FORMAT),
        sender,
        text
    )
}
