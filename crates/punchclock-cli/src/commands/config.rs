//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use punchclock_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: &PathBuf, output: &Output) -> Result<()> {
    let config = Config::load_from_path(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "data_dir": config.data_dir,
                "api_url": config.api_url,
                "push_url": config.push_url,
                "api_token": config.api_token.as_ref().map(|_| "********"),
                "device_id": config.device_id,
                "log_file": config.log_file,
                "sync": config.sync,
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let unset = || "(not set)".to_string();
            println!("Configuration:");
            println!("  data_dir:   {}", config.data_dir.display());
            println!("  api_url:    {}", config.api_url.clone().unwrap_or_else(unset));
            println!("  push_url:   {}", config.push_url.clone().unwrap_or_else(unset));
            println!(
                "  api_token:  {}",
                if config.api_token.is_some() { "(set)" } else { "(not set)" }
            );
            println!("  device_id:  {}", config.device_id.clone().unwrap_or_else(unset));
            println!(
                "  log_file:   {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(unset)
            );
            println!();
            println!("Sync:");
            let sync = &config.sync;
            println!("  sync.drain_interval_secs:       {}", sync.drain_interval_secs);
            println!("  sync.retry_base_delay_secs:     {}", sync.retry_base_delay_secs);
            println!("  sync.max_attempts:              {}", sync.max_attempts);
            println!("  sync.freshness_window_secs:     {}", sync.freshness_window_secs);
            println!("  sync.request_timeout_secs:      {}", sync.request_timeout_secs);
            println!("  sync.auto_sync_interval_secs:   {}", sync.auto_sync_interval_secs);
            println!("  sync.cleanup_interval_secs:     {}", sync.cleanup_interval_secs);
            println!("  sync.completed_retention_hours: {}", sync.completed_retention_hours);
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: &PathBuf, output: &Output) -> Result<()> {
    let mut config = Config::load_from_path(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    config
        .save_to_path(config_path)
        .context("Failed to save configuration")?;

    let shown = if key == "api_token" { "********" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

/// Empty string or "none" clears an optional value
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .ok()
        .with_context(|| format!("Invalid value for {}. Expected a whole number.", key))
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_url" => config.api_url = optional(value),
        "push_url" => config.push_url = optional(value),
        "api_token" => config.api_token = optional(value),
        "device_id" => config.device_id = optional(value),
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        "sync.drain_interval_secs" => config.sync.drain_interval_secs = number(key, value)?,
        "sync.retry_base_delay_secs" => config.sync.retry_base_delay_secs = number(key, value)?,
        "sync.max_attempts" => config.sync.max_attempts = number(key, value)?,
        "sync.freshness_window_secs" => config.sync.freshness_window_secs = number(key, value)?,
        "sync.request_timeout_secs" => config.sync.request_timeout_secs = number(key, value)?,
        "sync.auto_sync_interval_secs" => {
            config.sync.auto_sync_interval_secs = number(key, value)?
        }
        "sync.cleanup_interval_secs" => config.sync.cleanup_interval_secs = number(key, value)?,
        "sync.completed_retention_hours" => {
            config.sync.completed_retention_hours = number(key, value)?
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, api_url, push_url, api_token, device_id, log_file, sync.<setting>",
                key
            );
        }
    }
    Ok(())
}
