use chrono::{DateTime, Local, Utc};
use colored::{control, ColoredString, Colorize};

use crate::core::formatter::{
    format_balance, format_cycle_reset, format_reset_in, format_trend, format_window_bar,
    format_window_remaining,
};
use crate::core::models::usage::UsageSnapshot;
use crate::core::store::ProviderReport;

const BAR_WIDTH: usize = 12;

/// Render one provider row as a colored (or plain) block.
///
/// Layout:
/// ```text
///  Claude
///   5h       72% remaining [████████░░░░]
///            Resets in 2h 15m
///   7d       41% remaining [█████░░░░░░░]
///            Resets in 3d 4h
///   Sonnet   88% remaining [██████████░░]
///   Trend    +3.0 pts
/// ```
pub fn render_report(report: &ProviderReport, now: DateTime<Utc>, use_color: bool) -> String {
    control::set_override(use_color);

    if let Some(error) = &report.error {
        let header = format!(" {} (error)", report.name);
        return format!("{}\n  {}", header.bold(), error.red());
    }

    let mut lines = vec![format!(" {}", report.name).bold().to_string()];
    match &report.usage {
        Some(snapshot) if snapshot.has_usage() => render_snapshot(&mut lines, snapshot, now),
        _ => lines.push(format!("  {}", "No usage reported".dimmed())),
    }

    if let Some(delta) = report.session_trend {
        lines.push(format!("  {}    {}", "Trend".cyan(), color_trend(delta)));
    }

    lines.join("\n")
}

fn render_snapshot(lines: &mut Vec<String>, snapshot: &UsageSnapshot, now: DateTime<Utc>) {
    let provider = snapshot.provider;
    let windows = [
        (provider.session_label(), snapshot.session_usage, snapshot.session_reset_date),
        (provider.weekly_label(), snapshot.weekly_usage, snapshot.weekly_reset_date),
        (
            provider.secondary_label(),
            snapshot.secondary_model_usage,
            snapshot.secondary_reset_date,
        ),
    ];

    // Keep spacing even: a window without a reset line gets a blank line
    // before the next one.
    let mut prev_had_subline = true;
    for (label, used, resets_at) in windows {
        let Some(used) = used else { continue };
        if !prev_had_subline {
            lines.push(String::new());
        }
        render_window(lines, label, used, resets_at.as_ref(), now);
        prev_had_subline = resets_at.is_some();
    }

    if snapshot.is_secondary_only == Some(true) {
        lines.push(format!(
            "  {}     {}",
            "Note".cyan(),
            format!("Only {} left in this window", provider.secondary_label()).yellow()
        ));
    }

    if let Some(credits) = snapshot.remaining_credits {
        lines.push(format!("  {}  {}", "Credits".cyan(), format_balance(credits)));
    }

    let window_resets = [snapshot.session_reset_date, snapshot.weekly_reset_date];
    if let Some(reset) = snapshot.reset_date.filter(|r| !window_resets.contains(&Some(*r))) {
        lines.push(format!(
            "  {}    {}",
            "Cycle".cyan(),
            format_cycle_reset(&reset, &Local).dimmed()
        ));
    }
}

fn render_window(
    lines: &mut Vec<String>,
    label: &str,
    used_percent: f64,
    resets_at: Option<&DateTime<Utc>>,
    now: DateTime<Utc>,
) {
    let percent_str = format_window_remaining(used_percent);
    let bar_str = format_window_bar(used_percent, BAR_WIDTH);

    lines.push(format!(
        "  {}  {} {}",
        format!("{:<7}", label).cyan(),
        color_by_remaining(used_percent, &percent_str),
        bar_str.magenta()
    ));

    if let Some(resets_at) = resets_at {
        // 11 spaces to align under the percent/bar values
        lines.push(format!(
            "           {}",
            format_reset_in(resets_at, now).dimmed()
        ));
    }
}

/// Color the percent string green/yellow/red based on remaining percentage.
fn color_by_remaining(used_percent: f64, text: &str) -> ColoredString {
    let remaining = 100.0 - used_percent;
    if remaining >= 25.0 {
        text.green()
    } else if remaining >= 10.0 {
        text.yellow()
    } else {
        text.red()
    }
}

fn color_trend(delta: f64) -> ColoredString {
    let text = format_trend(delta);
    if delta >= 0.05 {
        text.yellow()
    } else if delta <= -0.05 {
        text.green()
    } else {
        text.dimmed()
    }
}
