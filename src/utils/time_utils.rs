use chrono::{DateTime, Utc};

// Time Helper functions

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn epoch_ms_to_utc(epoch_ms: i64) -> String {
    // Used for display purposes
    let dt = DateTime::from_timestamp_millis(epoch_ms).unwrap_or_default();
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
