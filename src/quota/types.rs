//! Usage: Quota window/snapshot primitives shared by fetchers and merge.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub used_percent: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// What one upstream read produced. Window slots are `None` when the
/// provider did not report that horizon; the manager's merge keeps the
/// last-known value for those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub session: Option<Window>,
    pub weekly: Option<Window>,
    pub session_unsupported: bool,
    pub limit_reached: bool,
    pub source_timestamp: DateTime<Utc>,
}

pub fn clamp_used_percent(value: f64) -> i64 {
    let rounded = value.round();
    if rounded < 0.0 {
        return 0;
    }
    if rounded > 100.0 {
        return 100;
    }
    rounded as i64
}

#[cfg(test)]
mod tests {
    use super::clamp_used_percent;

    #[test]
    fn clamp_rounds_then_bounds() {
        assert_eq!(clamp_used_percent(-1.0), 0);
        assert_eq!(clamp_used_percent(12.6), 13);
        assert_eq!(clamp_used_percent(100.4), 100);
        assert_eq!(clamp_used_percent(101.0), 100);
        assert_eq!(clamp_used_percent(0.0), 0);
    }
}
