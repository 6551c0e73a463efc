/// Unix timestamp in whole seconds.
pub fn unix_now() -> i64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_secs() as i64
}

/// Unix timestamp in milliseconds. Used where second granularity would
/// produce ties (matchmaking queue ordering).
pub fn unix_now_millis() -> i64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}
