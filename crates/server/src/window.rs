//! Window and limit clamping shared by the read API. Out-of-range or
//! unparseable values fall back to the endpoint default rather than being
//! truncated, so callers get either what they asked for or the default.

pub const MAX_WINDOW_MINUTES: i64 = 10_080; // one week
pub const MAX_SUMMARY_MINUTES: i64 = 1_440; // one day
pub const MAX_ALERT_LIMIT: i64 = 500;
pub const MAX_TIMELINE_LIMIT: i64 = 1_000;

pub fn clamp(raw: Option<i64>, default: i64, max: i64) -> i64 {
    match raw {
        Some(v) if v > 0 && v <= max => v,
        _ => default,
    }
}
