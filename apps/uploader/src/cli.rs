//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "bush-uploader", version)]
#[command(about = "Resumable chunked uploads to Bush storage")]
pub struct Cli {
    /// Configuration file (defaults to the per-user uploader.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Control-plane base URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Directory holding upload records.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Chunk size in bytes for new uploads.
    #[arg(long, global = true)]
    pub chunk_size: Option<u64>,

    /// Concurrent part transfers.
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,

    /// Retries per part after the first attempt.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a file
    Upload {
        file: PathBuf,
        /// Target namespace (defaults to the configured one).
        #[arg(short, long)]
        namespace: Option<String>,
        /// Upload id to use instead of a generated one.
        #[arg(long)]
        id: Option<String>,
    },
    /// Resume a paused upload
    Resume { id: String, file: PathBuf },
    /// Cancel an upload and discard its parts
    Cancel { id: String },
    /// List known uploads
    List,
    /// Remove completed, failed and cancelled uploads
    Clear,
    /// Pause uploads left running by a previous process
    Recover,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(n) = self.max_parallel {
            config.max_parallel = n;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
    }
}
