//! CLI command handlers.

mod harvest;
mod maintenance;
mod query;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use mirror_core::Mirror;
use serde::Serialize;

use crate::cli::Command;
use crate::config::Settings;

/// Everything a handler needs.
pub(crate) struct RunContext {
    pub(crate) mirror: Mirror,
    pub(crate) settings: Settings,
    pub(crate) interrupted: Arc<AtomicBool>,
    pub(crate) show_progress: bool,
}

pub(crate) async fn dispatch(command: Command, ctx: &RunContext) -> Result<()> {
    match command {
        Command::Sync(args) => harvest::run_sync_command(&args, ctx).await,
        Command::Download(args) => harvest::run_download_command(args, ctx).await,
        Command::Fetch(args) => harvest::run_fetch_command(&args, ctx).await,
        Command::Show(arg) => query::run_show_command(&arg, ctx).await,
        Command::Refs(arg) => query::run_refs_command(&arg, ctx).await,
        Command::CitedBy(args) => query::run_cited_by_command(&args, ctx).await,
        Command::Graph(arg) => query::run_graph_command(&arg, ctx).await,
        Command::Categories => query::run_categories_command(ctx).await,
        Command::Stats => query::run_stats_command(ctx).await,
        Command::Search(args) => query::run_search_command(&args, ctx).await,
        Command::Citations(arg) => maintenance::run_citations_command(&arg, ctx).await,
        Command::RebuildFts => maintenance::run_rebuild_fts_command(ctx).await,
        Command::RebuildCitations(args) => {
            maintenance::run_rebuild_citations_command(&args, ctx).await
        }
        Command::Verify => maintenance::run_verify_command(ctx).await,
    }
}

/// Prints `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
