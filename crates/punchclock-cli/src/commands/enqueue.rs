//! Enqueue command handler

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use punchclock_core::{EntityType, OperationKind};

use crate::app::App;
use crate::output::Output;

/// Queue a raw entity mutation
pub async fn enqueue(
    app: &App,
    kind: OperationKind,
    entity_type: EntityType,
    data: Option<String>,
    file: Option<PathBuf>,
    output: &Output,
) -> Result<()> {
    let text = match (data, file) {
        (Some(data), None) => data,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read payload file: {:?}", path))?,
        _ => bail!("Provide the entity payload with either --data or --file"),
    };

    let payload: serde_json::Value =
        serde_json::from_str(&text).context("Payload is not valid JSON")?;
    let op = app
        .engine
        .enqueue_json(kind, entity_type, payload)
        .await
        .with_context(|| format!("Invalid {} payload", entity_type))?;

    output.print_enqueued(&op);
    Ok(())
}
