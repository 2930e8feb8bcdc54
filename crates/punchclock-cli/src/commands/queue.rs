//! Queue command handlers

use anyhow::{bail, Result};

use punchclock_core::OperationState;

use crate::app::App;
use crate::output::Output;

/// List queued operations, optionally filtered by state
pub async fn list(app: &App, state: Option<String>, output: &Output) -> Result<()> {
    let filter = match state.as_deref() {
        None => None,
        Some(s) => Some(parse_state(s)?),
    };

    let operations: Vec<_> = app
        .engine
        .queue()
        .operations()
        .await
        .into_iter()
        .filter(|op| filter.map_or(true, |state| op.state == state))
        .collect();

    output.print_operations(&operations);
    Ok(())
}

/// Show queue counts
pub fn stats(app: &App, output: &Output) -> Result<()> {
    output.print_queue_stats(&app.engine.get_queue_stats());
    Ok(())
}

/// Put a failed operation back in line
pub async fn retry(app: &App, id: String, output: &Output) -> Result<()> {
    if !app.engine.retry_failed(&id).await {
        bail!("No failed operation with ID '{}'", id);
    }
    output.success(&format!("Operation {} queued for retry", id));
    Ok(())
}

/// Remove completed operations past retention
pub async fn cleanup(app: &App, output: &Output) -> Result<()> {
    let removed = app.engine.cleanup().await;
    output.success(&format!("Removed {} completed operation(s)", removed));
    Ok(())
}

fn parse_state(s: &str) -> Result<OperationState> {
    Ok(match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "pending" => OperationState::Pending,
        "in_flight" => OperationState::InFlight,
        "completed" => OperationState::Completed,
        "failed" => OperationState::Failed,
        other => bail!(
            "Unknown state '{}'. Use pending, in_flight, completed or failed.",
            other
        ),
    })
}
