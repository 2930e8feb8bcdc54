//! Logging setup
//!
//! The level comes from `PUNCHCLOCK_LOG` (e.g. `debug`); without it the
//! given default is used. Logs go to `log_file` when configured, stderr
//! otherwise.

use std::fs::OpenOptions;

use tracing::info;
use tracing_subscriber::EnvFilter;

use punchclock_core::Config;

/// Environment variable selecting the log level
const LOG_ENV: &str = "PUNCHCLOCK_LOG";

/// Install the global subscriber (no-op if one is already installed)
pub fn init(config: &Config, default_level: &str) {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| default_level.to_string());
    let env_filter = filter_for(&level);

    if let Some(ref log_path) = config.log_file {
        let file = match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                return;
            }
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(file)
            .try_init();

        info!("Logging to {:?}", log_path);
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "punchclock_core={},punchclock_cli={}",
        level, level
    ))
}
