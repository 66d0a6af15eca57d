//! Fixed-width text report of the detection log.

use std::fmt::Write;

use crate::error::PipelineError;
use crate::storage::{DetectionLog, LogEntry, SqliteDetectionLog};

const RULE_WIDTH: usize = 80;
pub const EMPTY_REPORT_LINE: &str = "No detections found in the database.";

/// Render all entries of the database at `db_path`. Opens it read-only.
pub fn render_report(db_path: &str) -> Result<String, PipelineError> {
    let store = SqliteDetectionLog::open_read_only(db_path)?;
    Ok(render_entries(&store.entries()?))
}

pub fn render_entries(entries: &[LogEntry]) -> String {
    let mut out = String::new();
    let heavy = "=".repeat(RULE_WIDTH);
    let _ = writeln!(out, "{}", heavy);
    let _ = writeln!(
        out,
        "{:<4} | {:<20} | {:<10} | {:<6} | Coordinates (x1, y1, x2, y2)",
        "ID", "Timestamp", "Label", "Conf"
    );
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    if entries.is_empty() {
        let _ = writeln!(out, "{}", EMPTY_REPORT_LINE);
    }
    for entry in entries {
        let _ = writeln!(
            out,
            "{:<4} | {:<20} | {:<10} | {:<6.2} | ({}, {}, {}, {})",
            entry.id,
            entry.timestamp,
            entry.label,
            entry.confidence,
            entry.x1,
            entry.y1,
            entry.x2,
            entry.y2
        );
    }
    let _ = writeln!(out, "{}", heavy);
    out
}
