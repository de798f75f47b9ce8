use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch; `0` if the clock is before it.
pub fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
