use chrono::{DateTime, Local};

// Get current local timestamp as a formatted string
pub fn current_local_timestamp_str(format_str: &str) -> String {
    let now: DateTime<Local> = Local::now();
    now.format(format_str).to_string()
}

/// Local date as `YYYYMMDD`, used in pipeline-mode filenames.
pub fn todays_date() -> String {
    current_local_timestamp_str("%Y%m%d")
}

/// Device timestamps are nanosecond counters; filenames carry them verbatim.
pub fn device_timestamp_str(timestamp_ns: u64) -> String {
    timestamp_ns.to_string()
}
