//! mediacache CLI - maintenance commands for the media metadata cache

mod commands;

use clap::{Parser, Subcommand};
use mediacache::config::{default_config_path, ensure_db_dir, load_config};
use mediacache::CacheConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mediacache")]
#[command(version)]
#[command(about = "Persistent metadata cache for a media server")]
#[command(long_about = r#"
mediacache keeps scan results, fetched metadata and thumbnails of a media
library in an embedded SQLite store, and migrates its schema between releases.

Example usage:
  mediacache migrate
  mediacache versions --json
  mediacache sweep --database ./cache
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (defaults to ./mediacache.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the store, overriding the configuration
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with the default settings
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Open the store and bring every table to its current version
    Migrate,

    /// Show recorded and target version of every table
    Versions,

    /// Delete rows whose file or parent row is gone
    Sweep,

    /// Show row counts per table
    Stats,

    /// Empty the cache; playback status is kept unless --all is given
    Reset {
        /// Drop every table, user data included
        #[arg(long)]
        all: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        matches!(self, OutputMode::Human)
    }
}

/// Print the JSON envelope every command uses in `--json` mode
pub fn emit_success(mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "status": "ok",
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

fn resolve_config(config: Option<&Path>, database: Option<PathBuf>) -> anyhow::Result<CacheConfig> {
    let path = config.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let explicit = config.is_some();
    let mut resolved = match load_config(Some(&path))? {
        Some(config) => config,
        None if explicit => anyhow::bail!("Config file not found: {}", path.display()),
        None => CacheConfig::default(),
    };
    if let Some(database) = database {
        resolved.database_dir = database;
    }
    ensure_db_dir(&resolved)?;
    Ok(resolved)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.json { OutputMode::Json } else { OutputMode::Human };

    if let Commands::Init { force } = cli.command {
        let path = cli.config.unwrap_or_else(default_config_path);
        return commands::run_init(&path, cli.database, force, output_mode);
    }
    let config = resolve_config(cli.config.as_deref(), cli.database)?;

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if let Some(level) = &config.log_level {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Migrate => commands::run_migrate(config, output_mode),
        Commands::Versions => commands::run_versions(config, output_mode),
        Commands::Sweep => commands::run_sweep(config, output_mode),
        Commands::Stats => commands::run_stats(config, output_mode),
        Commands::Reset { all } => commands::run_reset(config, all, output_mode),
    };

    if let Err(e) = &result {
        if output_mode.is_human() {
            mediacache::ui::error(&format!("{:#}", e));
        } else {
            let envelope = serde_json::json!({ "status": "error", "message": format!("{:#}", e) });
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        std::process::exit(1);
    }
    Ok(())
}
