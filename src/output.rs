//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Update
//!
//! ```text
//! Update run-0001
//!     Added: 12
//!     Removed: 1
//!     Unchanged: 340
//!     Resized: 11
//!     Failed: 1
//! Failures
//!     photos/2023/broken.jpg
//!         cannot decode ...
//! ```
//!
//! ## Browse
//!
//! ```text
//! 001 trip/ (id 4, resized)
//! 002 beach.jpg 1440x1080 2023-07-14
//! 003 pending.jpg (not resized)
//! ```
//!
//! ## Dates
//!
//! ```text
//! 2023-07-14  12 photos
//! 2023-07-15   3 photos
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure.

use crate::manager::ReconcileReport;
use crate::tree::Node;
use chrono::NaiveDate;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Update
// ============================================================================

pub fn format_report(title: &str, report: &ReconcileReport) -> Vec<String> {
    let mut lines = vec![format!("{title} {}", report.progress_id)];
    for (label, value) in [
        ("Added", report.added),
        ("Removed", report.removed),
        ("Unchanged", report.unchanged),
        ("Resized", report.resized),
        ("Failed", report.failed),
    ] {
        lines.push(format!("{}{label}: {value}", indent(1)));
    }
    if !report.failures.is_empty() {
        lines.push("Failures".to_string());
        for failure in &report.failures {
            lines.push(format!("{}{}", indent(1), failure.path));
            lines.push(format!("{}{}", indent(2), failure.error));
        }
    }
    lines
}

pub fn print_report(title: &str, report: &ReconcileReport) {
    for line in format_report(title, report) {
        println!("{line}");
    }
}

// ============================================================================
// Browse
// ============================================================================

fn node_line(index: usize, node: &Node) -> String {
    if node.is_folder {
        let mut detail = Vec::new();
        if let Some(id) = node.id {
            detail.push(format!("id {id}"));
        }
        if node.images_resized {
            detail.push("resized".to_string());
        }
        if detail.is_empty() {
            return format!("{} {}/", format_index(index), node.name);
        }
        return format!("{} {}/ ({})", format_index(index), node.name, detail.join(", "));
    }

    if !node.images_resized {
        return format!("{} {} (not resized)", format_index(index), node.name);
    }
    let mut line = format!(
        "{} {} {}x{}",
        format_index(index),
        node.name,
        node.width,
        node.height
    );
    if let Some(date) = node.date {
        line.push_str(&format!(" {}", date.format("%Y-%m-%d")));
    }
    line
}

pub fn format_browse(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| node_line(i + 1, node))
        .collect()
}

pub fn print_browse(nodes: &[Node]) {
    for line in format_browse(nodes) {
        println!("{line}");
    }
}

// ============================================================================
// Dates
// ============================================================================

pub fn format_dates(dates: &[(NaiveDate, usize)]) -> Vec<String> {
    let width = dates
        .iter()
        .map(|(_, n)| n.to_string().len())
        .max()
        .unwrap_or(1);
    dates
        .iter()
        .map(|(day, n)| {
            let count = format!("{n:>width$}");
            let word = if *n == 1 { "photo" } else { "photos" };
            format!("{}  {count} {word}", day.format("%Y-%m-%d"))
        })
        .collect()
}

pub fn print_dates(dates: &[(NaiveDate, usize)]) {
    for line in format_dates(dates) {
        println!("{line}");
    }
}

pub fn format_count(count: usize) -> String {
    plural(count, "photo")
}
