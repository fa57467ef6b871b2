//! CLI for the MSD multi-source downloader.

pub(crate) mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use msd_core::config;

use commands::{run_checksum, run_completions, run_get, run_probe};

/// Top-level CLI for the MSD downloader.
#[derive(Debug, Parser)]
#[command(name = "msd")]
#[command(about = "MSD: download one file from many mirrors at once", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a file from every given source in parallel.
    Get(GetArgs),

    /// Probe a URL and print its size and range support.
    Probe {
        /// HTTP/HTTPS URL to probe.
        url: String,
    },

    /// Compute the digest of a file (SHA-256 unless --sha1).
    Checksum {
        /// Path to the file.
        path: PathBuf,
        /// Use SHA-1 instead of SHA-256.
        #[arg(long)]
        sha1: bool,
    },

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// HTTP/HTTPS mirrors serving the same file.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Peer sources (one connection each).
    #[arg(long = "peer", value_name = "URL")]
    pub peers: Vec<String>,

    /// Output file, or a directory to place the file in (default: current directory).
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Expected size in bytes; sources reporting another size are ignored.
    #[arg(long, value_name = "BYTES")]
    pub size: Option<u64>,

    /// Expected digest, `sha256:<hex>`, `sha1:<hex>`, or bare SHA-256 hex.
    #[arg(long, value_name = "DIGEST")]
    pub digest: Option<String>,

    /// Also stream the bytes to stdout, in order, while downloading.
    #[arg(long)]
    pub stream: bool,
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Get(args) => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                run_get(args, cfg).await?
            }
            CliCommand::Probe { url } => {
                let cfg = config::load_or_init()?;
                run_probe(&url, cfg.transport.unwrap_or_default()).await?
            }
            CliCommand::Checksum { path, sha1 } => run_checksum(&path, sha1).await?,
            CliCommand::Completions { shell } => run_completions(shell)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
