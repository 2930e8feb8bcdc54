//! Status command handler

use anyhow::Result;

use crate::app::App;
use crate::output::Output;

/// Show engine status and queue counts
pub async fn show(app: &App, output: &Output) -> Result<()> {
    // Push queued writes first so the counts and network state are current
    if app.is_connected_mode() {
        let _ = app.engine.drain_now().await;
    }

    let status = app.engine.get_sync_status();
    let stats = app.engine.get_queue_stats();
    output.print_status(&status, &stats, app.engine.device_id());

    if output.format == crate::output::OutputFormat::Human {
        println!();
        println!(
            "API:  {}",
            app.config.api_url.as_deref().unwrap_or("(not set)")
        );
        println!(
            "Push: {}",
            app.config.push_url.as_deref().unwrap_or("(not set)")
        );
        println!("Data: {}", app.config.data_dir.display());
    }

    Ok(())
}
