//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sluice - cache-backed reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version)]
#[command(about = "Cache-backed, work-queue-driven reconciliation controller")]
#[command(
    long_about = "Sluice mirrors objects from an event source into a local indexed cache and reconciles each changed key through a deduplicating, rate-limited work queue."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller against a scripted deployment source until Ctrl+C
    Run {
        /// Controller configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the retry ceiling
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Walk through namespace and node index queries over three pods
    Index,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "sluice",
            "run",
            "--config",
            "sluice.toml",
            "--workers",
            "4",
            "--max-retries",
            "2",
        ]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Run {
                config: Some(_),
                workers: Some(4),
                max_retries: Some(2),
            })
        ));
    }

    #[test]
    fn test_index_takes_no_arguments() {
        assert!(Cli::try_parse_from(["sluice", "index"]).is_ok());
        assert!(Cli::try_parse_from(["sluice", "index", "--workers", "2"]).is_err());
    }
}
