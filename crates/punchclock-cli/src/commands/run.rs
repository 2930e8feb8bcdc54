//! Run command handler: keep the engine running until Ctrl-C

use anyhow::{Context, Result};
use tracing::info;

use punchclock_core::SyncStatus;

use crate::app::App;
use crate::output::{Output, OutputFormat};

/// Start the timers and the push bridge, print status changes, then stop
/// everything on Ctrl-C
pub async fn run(app: &App, output: &Output) -> Result<()> {
    let format = output.format;
    let _subscription = app.engine.on_sync_status_change(move |status| {
        print_status_line(format, status);
    });

    app.engine.start();
    match app.push_bridge() {
        Some(bridge) => {
            bridge.start();
        }
        None => output.message("Push URL not configured; syncing by polling only"),
    }

    output.message("Running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let stopped = app.engine.stop_all_timers();
    info!("Shut down, {} timers stopped", stopped);
    output.success("Stopped");
    Ok(())
}

fn print_status_line(format: OutputFormat, status: &SyncStatus) {
    match format {
        OutputFormat::Human => println!("{}", status_line(status)),
        OutputFormat::Json => match serde_json::to_string(status) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to encode status: {}", e),
        },
        OutputFormat::Quiet => {}
    }
}

fn status_line(status: &SyncStatus) -> String {
    let network = if status.is_online { "online" } else { "offline" };
    let syncing = if status.is_in_progress { ", syncing" } else { "" };
    format!(
        "[{}] {}{} | pending {} | failed {}",
        chrono::Local::now().format("%H:%M:%S"),
        network,
        syncing,
        status.pending_operations,
        status.failed_operations
    )
}
