use chrono::{Local, NaiveDateTime};

/// Wall-clock time in the local zone; schedules are expressed in local market time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn format_timestamp(at: Option<NaiveDateTime>) -> String {
    match at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}
