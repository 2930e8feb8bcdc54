//! Punchclock CLI
//!
//! Command-line interface to the Punchclock offline sync engine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use punchclock_core::{Config, EntityType, OperationKind};

mod app;
mod commands;
mod logging;
mod output;

use app::App;
use commands::shift::Fix;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "punchclock")]
#[command(about = "Punchclock - Offline-first time tracking sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sync status and queue counts
    Status,
    /// Run a full sync with the server
    Sync {
        /// Sync even if the last sync is recent
        #[arg(short, long)]
        force: bool,
    },
    /// Send queued operations now
    Drain,
    /// Queue a raw entity mutation
    Enqueue {
        /// create, update or delete
        kind: OperationKind,
        /// user, site, assignment or shift
        entity_type: EntityType,
        /// Entity payload as JSON
        #[arg(short, long, conflicts_with = "file")]
        data: Option<String>,
        /// Read the entity payload from a file
        #[arg(short = 'F', long)]
        file: Option<PathBuf>,
    },
    /// Check in or out of a shift
    Shift {
        #[command(subcommand)]
        command: ShiftCommands,
    },
    /// Inspect and manage the operation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Keep syncing in the background until Ctrl-C
    Run,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args)]
struct FixArgs {
    /// Latitude of the GPS fix
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    /// Longitude of the GPS fix
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
    /// Reported accuracy in meters
    #[arg(long)]
    accuracy: Option<f64>,
    /// Record the fix even if it is outside the site
    #[arg(long)]
    force: bool,
}

impl From<FixArgs> for Fix {
    fn from(args: FixArgs) -> Self {
        Fix {
            latitude: args.lat,
            longitude: args.lon,
            accuracy_m: args.accuracy,
            force: args.force,
        }
    }
}

#[derive(Subcommand)]
enum ShiftCommands {
    /// Check in to a shift
    CheckIn {
        /// Shift ID
        id: String,
        /// User ID (when the shift is not cached yet)
        #[arg(long)]
        user: Option<String>,
        /// Site ID (when the shift is not cached yet)
        #[arg(long)]
        site: Option<String>,
        #[command(flatten)]
        fix: FixArgs,
    },
    /// Check out of a shift
    CheckOut {
        /// Shift ID
        id: String,
        #[command(flatten)]
        fix: FixArgs,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List queued operations
    #[command(alias = "ls")]
    List {
        /// Only show operations in this state
        #[arg(short, long)]
        state: Option<String>,
    },
    /// Show counts by state
    Stats,
    /// Retry a failed operation
    Retry {
        /// Operation ID
        id: String,
    },
    /// Remove old completed operations
    Cleanup,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_url, push_url, api_token, sync.max_attempts, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);

    // Config commands don't need the engine
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &config_path, &output);
    }

    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;
    let default_level = if matches!(cli.command, Commands::Run) {
        "info"
    } else {
        "warn"
    };
    logging::init(&config, default_level);

    let app = App::open(config).await?;

    let is_write = matches!(
        cli.command,
        Commands::Enqueue { .. } | Commands::Shift { .. }
    );

    match cli.command {
        Commands::Status => commands::status::show(&app, &output).await?,
        Commands::Sync { force } => commands::sync::sync(&app, force, &output).await?,
        Commands::Drain => commands::sync::drain(&app, &output).await?,
        Commands::Enqueue {
            kind,
            entity_type,
            data,
            file,
        } => commands::enqueue::enqueue(&app, kind, entity_type, data, file, &output).await?,
        Commands::Shift { command } => handle_shift_command(command, &app, &output).await?,
        Commands::Queue { command } => handle_queue_command(command, &app, &output).await?,
        Commands::Run => commands::run::run(&app, &output).await?,
        Commands::Config { .. } => unreachable!(), // Handled above
    }

    // Push writes right away (they stay queued if that fails)
    if is_write {
        commands::sync::push_quiet(&app, &output).await;
    }

    Ok(())
}

async fn handle_shift_command(command: ShiftCommands, app: &App, output: &Output) -> Result<()> {
    match command {
        ShiftCommands::CheckIn {
            id,
            user,
            site,
            fix,
        } => commands::shift::check_in(app, id, user, site, fix.into(), output).await,
        ShiftCommands::CheckOut { id, fix } => {
            commands::shift::check_out(app, id, fix.into(), output).await
        }
    }
}

async fn handle_queue_command(command: QueueCommands, app: &App, output: &Output) -> Result<()> {
    match command {
        QueueCommands::List { state } => commands::queue::list(app, state, output).await,
        QueueCommands::Stats => commands::queue::stats(app, output),
        QueueCommands::Retry { id } => commands::queue::retry(app, id, output).await,
        QueueCommands::Cleanup => commands::queue::cleanup(app, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: &PathBuf,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::parse_from([
            "punchclock",
            "--json",
            "enqueue",
            "update",
            "shift",
            "--data",
            "{}",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Enqueue {
                kind, entity_type, ..
            } => {
                assert_eq!(kind, OperationKind::Update);
                assert_eq!(entity_type, EntityType::Shift);
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_parse_negative_coordinates() {
        let cli = Cli::parse_from([
            "punchclock",
            "shift",
            "check-out",
            "shift-1",
            "--lat",
            "-33.86",
            "--lon",
            "151.2",
        ]);
        match cli.command {
            Commands::Shift {
                command: ShiftCommands::CheckOut { fix, .. },
            } => {
                assert_eq!(fix.lat, -33.86);
                assert!(!fix.force);
            }
            _ => panic!("expected shift check-out"),
        }
    }
}
