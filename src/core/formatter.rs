use std::fmt::Display;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

const FULL_BLOCK: char = '█';
const USED_BLOCK: char = '░';

/// Headroom left in a window: "72% remaining".
pub fn format_window_remaining(used_percent: f64) -> String {
    let left = (100.0 - used_percent).clamp(0.0, 100.0);
    format!("{:.0}% remaining", left)
}

/// Countdown to a window reset, coarsest two units: "Resets in 3d 4h",
/// "Resets in 2h 15m", "Resets in 45m". Anything already due reads
/// "Resets now"; under a minute rounds up to "1m".
pub fn format_reset_in(resets_at: &DateTime<Utc>, now: DateTime<Utc>) -> String {
    let left = *resets_at - now;
    if left <= TimeDelta::zero() {
        return "Resets now".to_string();
    }

    let days = left.num_days();
    let hours = left.num_hours() % 24;
    let minutes = left.num_minutes() % 60;
    let span = match (days, hours) {
        (0, 0) => format!("{}m", minutes.max(1)),
        (0, h) => format!("{}h {}m", h, minutes),
        (d, 0) => format!("{}d", d),
        (d, h) => format!("{}d {}h", d, h),
    };
    format!("Resets in {}", span)
}

/// Billing-cycle reset shown as a calendar date in `tz`: "Resets Wed 1 May, 00:00".
pub fn format_cycle_reset<Tz>(resets_at: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("Resets {}", resets_at.with_timezone(tz).format("%a %-d %b, %H:%M"))
}

/// Fixed-width gauge of the remaining share: `[████████░░░░]`.
pub fn format_window_bar(used_percent: f64, width: usize) -> String {
    let used = (used_percent.clamp(0.0, 100.0) / 100.0 * width as f64).round() as usize;
    let left = width.saturating_sub(used);
    let gauge: String = (0..width)
        .map(|i| if i < left { FULL_BLOCK } else { USED_BLOCK })
        .collect();
    format!("[{}]", gauge)
}

/// Prepaid balance: "$2.50 remaining", or "-$1.25 remaining" once overdrawn.
pub fn format_balance(remaining: f64) -> String {
    let sign = if remaining < 0.0 { "-" } else { "" };
    format!("{}${:.2} remaining", sign, remaining.abs())
}

/// Session change since the previous snapshot: "+3.0 pts", "-1.5 pts".
pub fn format_trend(delta: f64) -> String {
    if delta.abs() < 0.05 {
        "steady".to_string()
    } else {
        format!("{:+.1} pts", delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn remaining_is_the_complement_of_usage() {
        assert_eq!(format_window_remaining(28.4), "72% remaining");
        assert_eq!(format_window_remaining(0.0), "100% remaining");
        assert_eq!(format_window_remaining(130.0), "0% remaining");
    }

    #[test]
    fn reset_in_picks_two_units() {
        let now = Utc.with_ymd_and_hms(2024, 4, 20, 15, 30, 0).unwrap();
        assert_eq!(format_reset_in(&(now - Duration::seconds(10)), now), "Resets now");
        assert_eq!(format_reset_in(&now, now), "Resets now");
        assert_eq!(format_reset_in(&(now + Duration::seconds(20)), now), "Resets in 1m");
        assert_eq!(format_reset_in(&(now + Duration::minutes(45)), now), "Resets in 45m");
        assert_eq!(format_reset_in(&(now + Duration::minutes(135)), now), "Resets in 2h 15m");
        assert_eq!(format_reset_in(&(now + Duration::hours(25)), now), "Resets in 1d 1h");
        assert_eq!(format_reset_in(&(now + Duration::days(3)), now), "Resets in 3d");
    }

    #[test]
    fn cycle_reset_is_a_calendar_date() {
        let reset = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(format_cycle_reset(&reset, &Utc), "Resets Wed 1 May, 00:00");
    }

    #[test]
    fn bar_fills_the_remaining_share() {
        assert_eq!(format_window_bar(0.0, 12), "[████████████]");
        assert_eq!(format_window_bar(100.0, 12), "[░░░░░░░░░░░░]");
        assert_eq!(format_window_bar(50.0, 12), "[██████░░░░░░]");
        assert_eq!(format_window_bar(72.0, 4), "[█░░░]");
    }

    #[test]
    fn balance_keeps_sign_outside_the_currency() {
        assert_eq!(format_balance(2.5), "$2.50 remaining");
        assert_eq!(format_balance(0.0), "$0.00 remaining");
        assert_eq!(format_balance(-1.25), "-$1.25 remaining");
    }

    #[test]
    fn format_trend_signs() {
        assert_eq!(format_trend(3.0), "+3.0 pts");
        assert_eq!(format_trend(-1.5), "-1.5 pts");
        assert_eq!(format_trend(0.01), "steady");
    }
}
