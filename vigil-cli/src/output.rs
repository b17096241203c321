//! Terminal rendering for journal entries and status transitions.

use serde_json::json;
use vigil_engine::{JournalEntry, Severity, StatusSnapshot};

use crate::cli::OutputFormat;

#[cfg(feature = "colored-output")]
use colored::Colorize;

pub fn print_entry(entry: &JournalEntry, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let line = json!({
                "kind": "journal",
                "time": entry.time,
                "severity": entry.severity.label(),
                "message": entry.message,
            });
            println!("{line}");
        }
        OutputFormat::Pretty => {
            let time = entry.time.format("%H:%M:%S%.3f");
            println!("{time}  {}  {}", severity_tag(entry.severity), entry.message);
        }
    }
}

pub fn print_status(snapshot: &StatusSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let line = json!({
                "kind": "status",
                "status": snapshot.status_label(),
                "source": snapshot.source_label(),
                "retries": format!("{}/{}", snapshot.retry_count, snapshot.max_retries),
                "user_start_required": snapshot.user_start_required,
                "probing": snapshot.probing,
            });
            println!("{line}");
        }
        OutputFormat::Pretty => {
            let mut line = format!(
                "status={} source={} retries={}/{}",
                snapshot.status_label(),
                snapshot.source_label(),
                snapshot.retry_count,
                snapshot.max_retries
            );
            if snapshot.user_start_required {
                line.push_str(" user-start-required");
            }
            if snapshot.probing {
                line.push_str(" probing");
            }
            println!("--- {line}");
        }
    }
}

#[cfg(feature = "colored-output")]
fn severity_tag(severity: Severity) -> String {
    match severity {
        Severity::Info => "INFO".normal(),
        Severity::Success => "OK  ".green().bold(),
        Severity::Warning => "WARN".yellow(),
        Severity::Error => "FAIL".red().bold(),
    }
    .to_string()
}

#[cfg(not(feature = "colored-output"))]
fn severity_tag(severity: Severity) -> String {
    match severity {
        Severity::Info => "INFO",
        Severity::Success => "OK  ",
        Severity::Warning => "WARN",
        Severity::Error => "FAIL",
    }
    .to_string()
}
