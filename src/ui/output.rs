//! ui::output
//!
//! Output formatting and display.
//!
//! # Design
//!
//! Output is formatted consistently and respects the quiet flag.
//! When `--json` is enabled, output is machine-readable JSON on stdout and
//! nothing else is written there.

use std::fmt::Display;

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::engine::{DiffEntry, DiffSummary, ExecutionResult, SyncReport};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - minimal output
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format a list of items.
pub fn format_list<T: Display>(items: &[T], prefix: &str) -> String {
    items
        .iter()
        .map(|item| format!("{}{}", prefix, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render rows as a table with a header and no borders.
pub fn table<T: Tabled>(rows: impl IntoIterator<Item = T>) -> String {
    Table::new(rows).with(Style::blank()).to_string()
}

/// Shorten a value for table display, on one line.
pub fn display_value(value: &[u8]) -> String {
    const MAX: usize = 60;
    let text = String::from_utf8_lossy(value).replace('\n', "\\n");
    if text.chars().count() > MAX {
        let cut: String = text.chars().take(MAX - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "STATUS")]
    status: &'static str,
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "OLD")]
    old: String,
    #[tabled(rename = "NEW")]
    new: String,
}

/// Render diff entries as a table.
pub fn diff_table<'a>(entries: impl IntoIterator<Item = DiffEntry<'a>>) -> String {
    table(entries.into_iter().map(|entry| {
        let (old, new) = match entry {
            DiffEntry::Added(e) => (String::new(), display_value(&e.value)),
            DiffEntry::Removed(e) => (display_value(&e.value), String::new()),
            DiffEntry::Changed { old, new } => (display_value(&old.value), display_value(&new.value)),
            DiffEntry::Unchanged(_) => (String::new(), String::new()),
        };
        DiffRow {
            status: entry.label(),
            key: entry.path().to_string(),
            old,
            new,
        }
    }))
}

/// One-line diff summary.
pub fn format_diff_summary(summary: &DiffSummary) -> String {
    format!(
        "{} added, {} removed, {} changed, {} unchanged",
        summary.added, summary.removed, summary.changed, summary.unchanged
    )
}

/// One-line execution summary.
pub fn format_execution(result: &ExecutionResult) -> String {
    format!(
        "{}: {} applied, {} failed, {} skipped",
        result.environment, result.applied, result.failed, result.skipped
    )
}

#[derive(Tabled)]
struct ProblemRow {
    #[tabled(rename = "ENVIRONMENT")]
    environment: String,
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "OUTCOME")]
    outcome: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

/// Full sync summary: counts per side, then every failed or skipped key.
pub fn format_sync_report(report: &SyncReport) -> String {
    let mut lines = Vec::new();
    for result in [&report.target, &report.source] {
        if !result.reports.is_empty() {
            lines.push(format_execution(result));
        }
    }
    if lines.is_empty() {
        lines.push("Already in sync".to_string());
    }

    let problems: Vec<ProblemRow> = [&report.target, &report.source]
        .into_iter()
        .flat_map(|result| {
            result.problems().map(move |r| ProblemRow {
                environment: result.environment.clone(),
                key: r.op.path().to_string(),
                outcome: r.outcome.to_string(),
                detail: r.message.clone().unwrap_or_default(),
            })
        })
        .collect();
    if !problems.is_empty() {
        lines.push(String::new());
        lines.push(table(problems));
    }
    if report.baseline_updated {
        lines.push("Baseline updated".to_string());
    }
    lines.join("\n")
}
