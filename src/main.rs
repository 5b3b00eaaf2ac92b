//! CLI entry point for the arXiv mirror.

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use mirror_core::Mirror;
use tracing::{debug, info, warn};

mod cli;
mod commands;
mod config;
mod progress;

use cli::Cli;
use commands::RunContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.global.quiet {
        "error"
    } else {
        match cli.global.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    // Logs go to stderr; stdout carries JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let loaded = config::load_file_config(cli.global.config.as_deref())?;
    if let (Some(path), Some(_)) = (&loaded.path, &loaded.config) {
        debug!(path = %path.display(), "config file loaded");
    }
    let settings = config::resolve_settings(&cli.global, loaded.config.as_ref())?;

    let mirror = Mirror::open(settings.mirror.clone()).await?;
    info!(root = %settings.mirror.root.display(), "mirror ready");

    let interrupted = Arc::new(AtomicBool::new(false));
    spawn_interrupt_handler(Arc::clone(&interrupted));

    let ctx = RunContext {
        mirror,
        settings,
        interrupted,
        show_progress: !cli.global.quiet && std::io::stderr().is_terminal(),
    };
    let result = commands::dispatch(cli.command, &ctx).await;
    ctx.mirror.close().await;
    result
}

/// First Ctrl-C raises the shared flag so runs stop after flushing; a
/// second one exits immediately.
fn spawn_interrupt_handler(interrupted: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received; finishing current batch (press Ctrl-C again to abort)");
        interrupted.store(true, Ordering::SeqCst);
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
