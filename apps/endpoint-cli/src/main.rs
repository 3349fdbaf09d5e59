//! Endpoint transfer command-line driver.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use endpoint_session::TransferConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON transfer configuration. Missing file means defaults.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Chunk size in bytes, overriding the configured default.
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file, download it again and compare digests
    Roundtrip {
        path: PathBuf,
        /// Store to create the file in
        #[arg(long, default_value = "default")]
        store: String,
        /// Write the downloaded copy here instead of keeping it in memory
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Send an inbox entry with the given files attached
    Entry {
        files: Vec<PathBuf>,
        #[arg(long, default_value = "default")]
        inbox: String,
        /// Entry payload
        #[arg(long, default_value = "")]
        payload: String,
    },
    /// Print the effective configuration, optionally saving it
    Config {
        #[arg(long, value_name = "PATH")]
        save: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => TransferConfig::load_from(path)?,
        None => TransferConfig::default(),
    };
    if let Some(chunk_size) = cli.chunk_size {
        config.default_chunk_size = chunk_size;
        config.validate()?;
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        chunk_size = config.default_chunk_size,
        "starting endpoint-cli"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match cli.cmd {
            Command::Roundtrip {
                path,
                store,
                output,
            } => commands::roundtrip(config, &path, &store, output.as_deref()).await,
            Command::Entry {
                files,
                inbox,
                payload,
            } => commands::send_entry(config, &files, &inbox, payload.as_bytes()).await,
            Command::Config { save } => commands::show_config(&config, save.as_deref()),
        }
    })
}
