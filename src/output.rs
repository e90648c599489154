//! CLI output formatting for run progress and the final summary.
//!
//! # Display
//!
//! One line per file that reached a terminal state, led by its path relative
//! to the tree being processed, followed by the size transition:
//!
//! ```text
//! album/dawn.jpg 1,000kB → 700kB (70%)
//! album/mist.png 900kB → 950kB reverted, output was larger
//! album/bad.jpg failed at transform: Processing failed: truncated data
//! old/dawn.jpg 700kB → 1,000kB restored
//! gone.jpg skipped, no file to restore over
//!
//! Total: 0.29MB saved from 1 images
//! Reverted: 1
//! Failed: 1
//! ```
//!
//! Files removed by the eligibility filter produce no line; they are only
//! visible at debug log level.
//!
//! # Architecture
//!
//! Each `format_*` function is pure and returns strings for testability;
//! `print_*` wrappers write to stdout.

use crate::config::Mode;
use crate::mode::{RunEvent, RunReport};
use std::path::Path;

// ============================================================================
// Byte formatting
// ============================================================================

/// Group digits in threes: `1234567` → `1,234,567`.
fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Whole kilobytes (1024 bytes), rounded to nearest.
pub fn format_kb(bytes: u64) -> String {
    format!("{}kB", thousands((bytes + 512) / 1024))
}

/// Megabytes (1024² bytes) with two decimals.
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2}MB", bytes as f64 / (1024.0 * 1024.0))
}

/// New size as a rounded percentage of the original.
fn percent_of(new: u64, original: u64) -> u64 {
    if original == 0 {
        return 100;
    }
    ((new as f64 / original as f64) * 100.0).round() as u64
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

// ============================================================================
// Per-file events
// ============================================================================

/// Format one run event, or `None` for events that are not displayed.
pub fn format_run_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::Committed {
            path,
            original_size,
            new_size,
        } => Some(format!(
            "{} {} → {} ({}%)",
            display(path),
            format_kb(*original_size),
            format_kb(*new_size),
            percent_of(*new_size, *original_size)
        )),
        RunEvent::Reverted {
            path,
            original_size,
            attempted_size,
        } => Some(format!(
            "{} {} → {} reverted, output was larger",
            display(path),
            format_kb(*original_size),
            format_kb(*attempted_size)
        )),
        RunEvent::Failed {
            path,
            stage,
            reason,
        } => Some(format!("{} failed at {}: {}", display(path), stage, reason)),
        RunEvent::Filtered { .. } => None,
        RunEvent::Restored {
            path,
            previous_size,
            restored_size,
        } => Some(format!(
            "{} {} → {} restored",
            display(path),
            format_kb(*previous_size),
            format_kb(*restored_size)
        )),
        RunEvent::Skipped { path } => Some(format!(
            "{} skipped, no file to restore over",
            display(path)
        )),
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Final totals. The first line is always present, even in quiet mode.
pub fn format_summary(report: &RunReport) -> Vec<String> {
    let totals = &report.totals;
    let mut lines = Vec::new();

    match report.mode {
        Mode::Restore => lines.push(format!("Total: {} images restored", totals.files)),
        Mode::Overwrite | Mode::Copy => lines.push(format!(
            "Total: {} saved from {} images",
            format_mb(totals.bytes_saved),
            totals.files
        )),
    }

    if totals.reverted > 0 {
        lines.push(format!("Reverted: {}", totals.reverted));
    }
    if totals.failed > 0 {
        lines.push(format!("Failed: {}", totals.failed));
    }
    if report.cancelled {
        lines.push(format!(
            "Cancelled: {} queued files not started",
            totals.cancelled
        ));
    }
    if let Some(err) = &report.ownership_error {
        lines.push(format!("Warning: ownership not applied: {err}"));
    }
    lines
}

/// Print the summary to stdout.
pub fn print_summary(report: &RunReport) {
    for line in format_summary(report) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Snapshot;
    use crate::eligibility::Rejection;
    use crate::transaction::Stage;
    use std::path::PathBuf;

    const KB: u64 = 1024;

    fn report(mode: Mode, totals: Snapshot) -> RunReport {
        RunReport {
            mode,
            totals,
            failures: Vec::new(),
            cancelled: false,
            peak_concurrency: 1,
            ownership_error: None,
        }
    }

    #[test]
    fn thousands_groups_digits() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn kb_rounds_to_nearest() {
        assert_eq!(format_kb(1000 * KB), "1,000kB");
        assert_eq!(format_kb(700 * KB), "700kB");
        assert_eq!(format_kb(511), "0kB");
        assert_eq!(format_kb(512), "1kB");
    }

    #[test]
    fn mb_has_two_decimals() {
        assert_eq!(format_mb(300 * KB), "0.29MB");
        assert_eq!(format_mb(0), "0.00MB");
        assert_eq!(format_mb(5 * KB * KB), "5.00MB");
    }

    #[test]
    fn committed_line_shows_transition_and_ratio() {
        let event = RunEvent::Committed {
            path: PathBuf::from("album/dawn.jpg"),
            original_size: 1000 * KB,
            new_size: 700 * KB,
        };
        assert_eq!(
            format_run_event(&event).unwrap(),
            "album/dawn.jpg 1,000kB → 700kB (70%)"
        );
    }

    #[test]
    fn reverted_and_failed_lines() {
        let reverted = RunEvent::Reverted {
            path: PathBuf::from("mist.png"),
            original_size: 900 * KB,
            attempted_size: 950 * KB,
        };
        assert_eq!(
            format_run_event(&reverted).unwrap(),
            "mist.png 900kB → 950kB reverted, output was larger"
        );

        let failed = RunEvent::Failed {
            path: PathBuf::from("bad.jpg"),
            stage: Stage::Transform,
            reason: "truncated data".into(),
        };
        assert_eq!(
            format_run_event(&failed).unwrap(),
            "bad.jpg failed at transform: truncated data"
        );
    }

    #[test]
    fn filtered_files_are_silent() {
        let event = RunEvent::Filtered {
            path: PathBuf::from("small.jpg"),
            rejection: Rejection::TooSmall {
                size: 500 * KB,
                min_size: 800 * KB,
            },
        };
        assert_eq!(format_run_event(&event), None);
    }

    #[test]
    fn restore_lines() {
        let restored = RunEvent::Restored {
            path: PathBuf::from("a.jpg"),
            previous_size: 700 * KB,
            restored_size: 1000 * KB,
        };
        assert_eq!(
            format_run_event(&restored).unwrap(),
            "a.jpg 700kB → 1,000kB restored"
        );
        let skipped = RunEvent::Skipped {
            path: PathBuf::from("gone.jpg"),
        };
        assert_eq!(
            format_run_event(&skipped).unwrap(),
            "gone.jpg skipped, no file to restore over"
        );
    }

    #[test]
    fn summary_for_overwrite() {
        let totals = Snapshot {
            files: 1,
            bytes_saved: 300 * KB,
            committed: 1,
            ..Snapshot::default()
        };
        assert_eq!(
            format_summary(&report(Mode::Overwrite, totals)),
            vec!["Total: 0.29MB saved from 1 images"]
        );
    }

    #[test]
    fn summary_for_restore() {
        let totals = Snapshot {
            files: 4,
            ..Snapshot::default()
        };
        assert_eq!(
            format_summary(&report(Mode::Restore, totals)),
            vec!["Total: 4 images restored"]
        );
    }

    #[test]
    fn summary_lists_reverts_failures_and_cancellation() {
        let totals = Snapshot {
            reverted: 2,
            failed: 1,
            cancelled: 5,
            ..Snapshot::default()
        };
        let mut r = report(Mode::Copy, totals);
        r.cancelled = true;
        r.ownership_error = Some("user 'nobody2' not found".into());
        assert_eq!(
            format_summary(&r),
            vec![
                "Total: 0.00MB saved from 0 images",
                "Reverted: 2",
                "Failed: 1",
                "Cancelled: 5 queued files not started",
                "Warning: ownership not applied: user 'nobody2' not found",
            ]
        );
    }
}
