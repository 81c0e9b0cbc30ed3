/// Upper bound past which a parsed percentage is considered a misparse.
pub const MAX_SANE_PERCENT: f64 = 200.0;

/// Raw payload rule: `<= 1` is a fraction, anything larger is already a
/// percentage.
pub fn fraction_to_percent(value: f64) -> f64 {
    if value <= 1.0 {
        value * 100.0
    } else {
        value
    }
}

/// Display rule used on stored snapshot values (trend, thresholds).
pub fn display_percent(value: f64) -> f64 {
    if value < 1.0 {
        value * 100.0
    } else {
        value
    }
}

/// `used / limit` as an already-scaled percentage.
pub fn ratio_percent(used: f64, limit: f64) -> Option<f64> {
    if limit > 0.0 && used.is_finite() && limit.is_finite() {
        within_sane_range(used / limit * 100.0)
    } else {
        None
    }
}

/// Reject values outside `[0, 200]`.
pub fn within_sane_range(value: f64) -> Option<f64> {
    if value.is_finite() && (0.0..=MAX_SANE_PERCENT).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Final form stored in a snapshot: sane, then capped at 100.
pub fn sanitize_percent(value: f64) -> Option<f64> {
    within_sane_range(value).map(|v| v.min(100.0))
}
