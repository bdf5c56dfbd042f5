//! Derived metrics computed at write time.
//!
//! The formulas (including rounding) are the wire contract with existing
//! rows; change them and historical and fresh data stop being comparable.

const DAY_MS: f64 = 86_400_000.0;

/// Share of on-page time spent with the tab focused, in whole percent.
/// Defined as 100 when no time has accrued at all.
pub fn focus_time_percent(total_time_sec: u64, tab_hidden_ms: i64) -> u32 {
    let focus_ms = total_time_sec as f64 * 1000.0;
    let total_ms = focus_ms + tab_hidden_ms.max(0) as f64;
    if total_ms <= 0.0 {
        return 100;
    }
    ((focus_ms / total_ms) * 100.0).round() as u32
}

/// Average pointer speed over the sampled movement time; 0 when nothing
/// was sampled.
pub fn mouse_velocity_px_sec(distance_px: f64, sample_ms: i64) -> u64 {
    if sample_ms <= 0 {
        return 0;
    }
    (distance_px / (sample_ms as f64 / 1000.0)).round() as u64
}

/// Visits per week since the first visit, to one decimal place. The first
/// week is floored to avoid a divide-by-near-zero spike for new visitors.
pub fn visit_frequency_per_week(total_visits: u64, now_ms: i64, first_visit_ms: i64) -> f64 {
    let weeks = ((now_ms - first_visit_ms) as f64 / (DAY_MS * 7.0)).max(1.0);
    let frequency = total_visits as f64 / weeks;
    (frequency * 10.0).round() / 10.0
}

/// Whole days elapsed since a reference timestamp, rounded.
pub fn days_since(now_ms: i64, then_ms: i64) -> i64 {
    ((now_ms - then_ms) as f64 / DAY_MS).round() as i64
}
