//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use punchclock_core::sync::{DrainReport, SkipReason};
use punchclock_core::{QueueStats, SyncOperation, SyncReport, SyncStatus};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print the engine status
    pub fn print_status(&self, status: &SyncStatus, stats: &QueueStats, device_id: &str) {
        match self.format {
            OutputFormat::Human => {
                println!("Punchclock Status");
                println!("=================");
                println!();
                println!("Device:    {}", device_id);
                println!(
                    "Network:   {}",
                    if status.is_online { "online" } else { "offline" }
                );
                println!("Last sync: {}", format_time(status.last_sync_time));
                if status.is_in_progress {
                    println!("           (sync in progress)");
                }
                println!();
                self.print_stats_block(stats);
            }
            OutputFormat::Json => {
                self.json(&serde_json::json!({
                    "deviceId": device_id,
                    "status": status,
                    "queue": stats,
                }));
            }
            OutputFormat::Quiet => {
                println!("{}", status.pending_operations);
            }
        }
    }

    /// Print queue counts
    pub fn print_queue_stats(&self, stats: &QueueStats) {
        match self.format {
            OutputFormat::Human => self.print_stats_block(stats),
            OutputFormat::Json => self.json(stats),
            OutputFormat::Quiet => println!("{}", stats.pending),
        }
    }

    fn print_stats_block(&self, stats: &QueueStats) {
        println!("Queue:");
        println!("  Pending:   {}", stats.pending);
        println!("  In flight: {}", stats.in_flight);
        println!("  Completed: {}", stats.completed);
        println!("  Failed:    {}", stats.failed);
        println!("  Total:     {}", stats.total);
        if let Some(oldest) = stats.oldest_pending {
            println!("  Oldest:    {}", format_time(Some(oldest)));
        }
    }

    /// Print a list of queued operations
    pub fn print_operations(&self, operations: &[SyncOperation]) {
        match self.format {
            OutputFormat::Human => {
                if operations.is_empty() {
                    println!("Queue is empty.");
                    return;
                }
                for op in operations {
                    let error = op
                        .last_error
                        .as_deref()
                        .map(|e| format!(" | {}", truncate(e, 40)))
                        .unwrap_or_default();
                    println!(
                        "{} | {:<9} | {:<6} {:<10} {} | {}/{}{}",
                        op.id,
                        op.state.as_str(),
                        op.kind.as_str(),
                        op.entity_type().as_str(),
                        truncate(&op.entity_id, 24),
                        op.attempts,
                        op.max_attempts,
                        error
                    );
                }
                println!("\n{} operation(s)", operations.len());
            }
            OutputFormat::Json => self.json(operations),
            OutputFormat::Quiet => {
                for op in operations {
                    println!("{}", op.id);
                }
            }
        }
    }

    /// Print the outcome of a full sync
    pub fn print_sync_report(&self, report: &SyncReport) {
        match self.format {
            OutputFormat::Human => {
                if report.up_to_date {
                    println!("✓ Already up to date");
                    return;
                }
                println!("✓ Sync complete");
                println!("  Sent:      {}", report.sent);
                println!("  Merged:    {}", report.merged);
                println!("  Removed:   {}", report.removed);
                if report.conflicts > 0 {
                    println!("  Held back: {} (local writes pending)", report.conflicts);
                }
            }
            OutputFormat::Json => self.json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print the outcome of a drain pass
    pub fn print_drain_report(&self, report: &DrainReport) {
        match self.format {
            OutputFormat::Human => match report.skipped {
                Some(SkipReason::Offline) => println!("Offline, nothing sent."),
                Some(SkipReason::AlreadyDraining) => println!("A drain is already running."),
                None => {
                    println!("✓ Drained {} operation(s)", report.dispatched);
                    println!("  Completed: {}", report.completed);
                    println!("  Retrying:  {}", report.retried);
                    println!("  Failed:    {}", report.failed);
                }
            },
            OutputFormat::Json => {
                self.json(&serde_json::json!({
                    "skipped": report.skipped.map(skip_reason_str),
                    "dispatched": report.dispatched,
                    "completed": report.completed,
                    "retried": report.retried,
                    "failed": report.failed,
                }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a newly queued operation
    pub fn print_enqueued(&self, op: &SyncOperation) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "✓ Queued {} {} {} ({})",
                    op.kind,
                    op.entity_type(),
                    op.entity_id,
                    op.id
                );
            }
            OutputFormat::Json => self.json(op),
            OutputFormat::Quiet => println!("{}", op.id),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warn(&self, msg: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", msg);
        }
    }
}

fn skip_reason_str(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::Offline => "offline",
        SkipReason::AlreadyDraining => "already_draining",
    }
}

/// Format an optional timestamp in local time
fn format_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
