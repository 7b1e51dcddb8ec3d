use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

const RUN_TAG_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Length of a formatted run tag (`YYYYmmdd_HHMMSS`).
pub(crate) const RUN_TAG_LEN: usize = 15;

/// Collection timestamp for a run started at `now`.
///
/// Truncated to whole seconds so that the tag embedded in file names
/// reproduces the in-memory timestamp exactly.
pub fn run_timestamp(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_run_tag(ts: DateTime<Utc>) -> String {
    ts.format(RUN_TAG_FORMAT).to_string()
}

pub fn parse_run_tag(tag: &str) -> Option<DateTime<Utc>> {
    if tag.len() != RUN_TAG_LEN {
        return None;
    }
    NaiveDateTime::parse_from_str(tag, RUN_TAG_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
