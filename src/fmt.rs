//! Formatting helpers for report text.

/// Format byte count as human-readable size: `"1.5 GiB"`, `"512 B"`.
pub fn format_bytes(bytes: i64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let b = bytes as f64;
    if b.abs() >= GIB {
        format!("{:.1} GiB", b / GIB)
    } else if b.abs() >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b.abs() >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds: `"3m 5s"`, `"2d 4h"`, `"0s"` for `<= 0`.
pub fn format_duration(secs: i64) -> String {
    if secs <= 0 {
        return "0s".to_string();
    }
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Milliseconds with two decimals, as in the query tables.
pub fn format_ms(ms: f64) -> String {
    format!("{:.2}", ms)
}

/// A percentage rounded to two decimals, or `"n/a"` when undefined.
pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.2}", v),
        _ => "n/a".to_string(),
    }
}

/// Per-second rate: `"12.5/s"`, `"0"` below 0.01.
pub fn format_rate(rate: f64) -> String {
    if rate < 0.01 {
        "0".to_string()
    } else if rate >= 1_000.0 {
        format!("{:.1}K/s", rate / 1_000.0)
    } else {
        format!("{:.1}/s", rate)
    }
}

/// Truncate to `max_chars` characters, marking the cut with `...`.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars).collect();
        format!("{}...", kept)
    }
}

/// Collapse whitespace runs (including newlines) to single spaces.
pub fn normalize_query(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
