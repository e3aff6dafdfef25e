use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "stratactl", about = "Inspect and drive a Strata image cache")]
struct Cli {
    /// Config file (TOML or JSON); defaults to STRATA_CONFIG_PATH and the
    /// usual search locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cache root, overriding the configured one
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured formats
    Formats,
    /// Resolve SOURCE (file path or http(s) URL) through the cache
    Fetch {
        #[arg(long)]
        format: String,
        /// Cache key; defaults to SOURCE
        #[arg(long)]
        key: Option<String>,
        /// Write the formatted image here (png or jpg by extension)
        #[arg(long)]
        out: Option<PathBuf>,
        source: String,
    },
    /// List a format's store entries, most recently accessed first
    Entries {
        #[arg(long)]
        format: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Remove a key, a format, or everything
    Purge {
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,strata_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Command::Formats => commands::formats(&config),
        Command::Fetch {
            format,
            key,
            out,
            source,
        } => commands::fetch(&config, &format, key, out, &source).await,
        Command::Entries { format, limit } => {
            commands::entries(&config, &format, limit).await
        }
        Command::Purge { format, key } => {
            commands::purge(&config, format.as_deref(), key.as_deref()).await
        }
    }
}
