//! Airspace Cache CLI - Command-line interface
//!
//! Resolves viewports through the tiered airspace cache and manages the
//! persistent store.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use airspace_cache::BoundingBox;
use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::viewport::ViewportArgs;
use error::CliError;
use runner::{CliRunner, GlobalOptions};

#[derive(Parser)]
#[command(name = "airspace-cache")]
#[command(version, about = "Tiered airspace geometry cache", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.airspace-cache/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the persistent cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the airspaces of a viewport
    Viewport {
        /// Bounds as south,west,north,east in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        bounds: BoundingBox,

        /// Map zoom level (fractional zooms allowed)
        #[arg(long, default_value = "9")]
        zoom: f64,

        /// Remote airspace endpoint (overrides config)
        #[arg(long)]
        endpoint: Option<String>,

        /// API key for the remote endpoint (overrides config)
        #[arg(long)]
        api_key: Option<String>,

        /// Serve cached data only, never contact the remote source
        #[arg(long)]
        offline: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show persistent cache statistics
    Stats,

    /// Remove every cached airspace and tile
    Clear,

    /// Expire, pre-warm and compact the cache
    Maintain {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let options = GlobalOptions {
        config: cli.config,
        cache_dir: cli.cache_dir,
    };
    let runner = CliRunner::new(&options)?;

    match cli.command {
        Commands::Viewport {
            bounds,
            zoom,
            endpoint,
            api_key,
            offline,
            json,
        } => {
            commands::viewport::run(
                runner,
                ViewportArgs {
                    bounds,
                    zoom,
                    endpoint,
                    api_key,
                    offline,
                    json,
                },
            )
            .await
        }
        Commands::Stats => commands::cache::run(runner, CacheAction::Stats).await,
        Commands::Clear => commands::cache::run(runner, CacheAction::Clear).await,
        Commands::Maintain { once } => commands::maintain::run(runner, once).await,
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
    fn test_parse_viewport() {
        let cli = Cli::try_parse_from([
            "airspace-cache",
            "--cache-dir",
            "/tmp/ac",
            "viewport",
            "--bounds",
            "45,6,47,9",
            "--zoom",
            "10.5",
        ])
        .unwrap();
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/ac")));
        match cli.command {
            Commands::Viewport { bounds, zoom, .. } => {
                assert_eq!(bounds.north, 47.0);
                assert_eq!(zoom, 10.5);
            }
            _ => panic!("expected viewport command"),
        }
    }

    #[test]
    fn test_parse_maintenance_commands() {
        let cli = Cli::try_parse_from(["airspace-cache", "maintain", "--once"]).unwrap();
        assert!(matches!(cli.command, Commands::Maintain { once: true }));
        let cli = Cli::try_parse_from(["airspace-cache", "clear", "--config", "a.ini"]).unwrap();
        assert!(matches!(cli.command, Commands::Clear));
        assert_eq!(cli.config, Some(PathBuf::from("a.ini")));
    }

    #[test]
    fn test_rejects_invalid_bounds() {
        let result = Cli::try_parse_from([
            "airspace-cache",
            "viewport",
            "--bounds",
            "47,6,45,9",
        ]);
        assert!(result.is_err());
    }
}
