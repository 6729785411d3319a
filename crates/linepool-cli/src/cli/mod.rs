//! CLI for the linepool client.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use linepool_core::config;

use commands::{run_config, run_send};

/// Top-level CLI for the linepool client.
#[derive(Debug, Parser)]
#[command(name = "linepool")]
#[command(about = "linepool: pooled line-protocol client with backoff", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Send request lines and print the response for each.
    Send {
        /// Request lines, sent in order.
        #[arg(required = true, value_name = "LINE")]
        lines: Vec<String>,

        /// Retry timeouts and connection failures using the configured policy.
        #[arg(long)]
        retry: bool,

        /// Server address (host:port); overrides the config file.
        #[arg(long, value_name = "ADDR")]
        address: Option<String>,
    },

    /// Show the config file path and the effective configuration.
    Config,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Send {
                lines,
                retry,
                address,
            } => run_send(&cfg, &lines, retry, address.as_deref()).await?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
