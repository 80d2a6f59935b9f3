//! kasane command-line tool.
//!
//! Builds the backend tree described by a RON configuration and runs one
//! filesystem operation against it.
//!
//! Usage:
//!   kasane backends
//!   kasane --config site.ron ls /static
//!   kasane put /data/notes.txt ./notes.txt
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strum::IntoEnumIterator;
use tracing_subscriber::{EnvFilter, fmt};

use kasane_vfs::registry;
use kasane_vfs::{BackendConfig, BackendKind, FileAttr, FileSystem};

/// Composable virtual filesystem tool.
#[derive(Parser, Debug)]
#[command(name = "kasane")]
#[command(about = "Inspect and modify kasane virtual filesystems")]
struct Args {
    /// Backend configuration (RON)
    #[arg(short, long, default_value = "kasane.ron")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the registered backend kinds
    Backends,
    /// List a directory
    Ls { path: String },
    /// Show file attributes
    Stat { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Copy a host file into the virtual filesystem
    Put { path: String, local: PathBuf },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file or an empty directory
    Rm { path: String },
}

impl Command {
    fn mutates(&self) -> bool {
        matches!(
            self,
            Command::Put { .. } | Command::Mkdir { .. } | Command::Rm { .. }
        )
    }
}

fn describe(name: &str, attr: &FileAttr) -> String {
    let kind = if attr.is_dir() { 'd' } else { '-' };
    format!("{}{:04o} {:>10} {}", kind, attr.perm, attr.size, name)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::Backends = args.command {
        for kind in BackendKind::iter() {
            println!("{:<16} {}", kind, kind.description());
        }
        return Ok(());
    }

    let config = BackendConfig::load(&args.config)
        .await
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let built = registry::build(&config)
        .await
        .context("failed to build backends")?;
    let fs = built.fs();
    tracing::debug!(root = fs.name(), "backends ready");

    run(fs.as_ref(), &args.command).await?;

    if args.command.mutates() {
        built.drained().await;
    }
    Ok(())
}

async fn run(fs: &dyn FileSystem, command: &Command) -> Result<()> {
    match command {
        Command::Backends => {}
        Command::Ls { path } => {
            let names = fs
                .readdir(path)
                .await
                .with_context(|| format!("cannot list {}", path))?;
            for name in names {
                let child = kasane_vfs::path::join(&kasane_vfs::path::normalize(path), &name);
                let attr = fs
                    .stat(&child)
                    .await
                    .with_context(|| format!("cannot stat {}", child))?;
                println!("{}", describe(&name, &attr));
            }
        }
        Command::Stat { path } => {
            let attr = fs
                .stat(path)
                .await
                .with_context(|| format!("cannot stat {}", path))?;
            println!("{}", describe(path, &attr));
        }
        Command::Cat { path } => {
            let data = fs
                .read_file(path)
                .await
                .with_context(|| format!("cannot read {}", path))?;
            std::io::stdout().write_all(&data)?;
        }
        Command::Put { path, local } => {
            let data = tokio::fs::read(local)
                .await
                .with_context(|| format!("cannot read {}", local.display()))?;
            fs.write_file(path, &data)
                .await
                .with_context(|| format!("cannot write {}", path))?;
            tracing::info!(path = %path, bytes = data.len(), "stored");
        }
        Command::Mkdir { path } => {
            fs.mkdir(path)
                .await
                .with_context(|| format!("cannot create {}", path))?;
        }
        Command::Rm { path } => {
            let attr = fs
                .stat(path)
                .await
                .with_context(|| format!("cannot stat {}", path))?;
            let removed = if attr.is_dir() {
                fs.rmdir(path).await
            } else {
                fs.unlink(path).await
            };
            removed.with_context(|| format!("cannot remove {}", path))?;
        }
    }
    Ok(())
}
