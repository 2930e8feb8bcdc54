//! Sync and drain command handlers

use anyhow::{bail, Result};

use punchclock_core::SyncError;

use crate::app::App;
use crate::output::Output;

fn require_api(app: &App) -> Result<()> {
    if !app.is_connected_mode() {
        bail!(
            "API URL not configured. Set it with:\n  \
             punchclock config set api_url https://your-server/api"
        );
    }
    Ok(())
}

/// Run a full bidirectional sync
pub async fn sync(app: &App, force: bool, output: &Output) -> Result<()> {
    require_api(app)?;

    output.message("Syncing...");
    match app.engine.sync(force).await {
        Ok(report) => {
            output.print_sync_report(&report);
            Ok(())
        }
        Err(SyncError::Offline) => bail!("Server unreachable; local changes stay queued"),
        Err(e) => Err(e.into()),
    }
}

/// Send queued operations now
pub async fn drain(app: &App, output: &Output) -> Result<()> {
    require_api(app)?;

    let report = app.engine.drain_now().await;
    output.print_drain_report(&report);
    Ok(())
}

/// Push queued writes after a write command; failures are only reported
pub async fn push_quiet(app: &App, output: &Output) {
    if !app.is_connected_mode() {
        return;
    }

    let report = app.engine.drain_now().await;
    if report.skipped.is_some() {
        output.warn("Offline; change queued for later");
    } else if report.retried + report.failed > 0 {
        output.warn(&format!(
            "{} operation(s) could not be sent; see `punchclock queue list`",
            report.retried + report.failed
        ));
    }
}
