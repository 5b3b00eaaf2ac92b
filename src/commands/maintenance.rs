//! Index maintenance and repair handlers.

use anyhow::Result;
use serde_json::json;

use super::{RunContext, print_json};
use crate::cli::{PaperArg, RebuildCitationsArgs};

pub(crate) async fn run_citations_command(arg: &PaperArg, ctx: &RunContext) -> Result<()> {
    let edges = ctx.mirror.update_citations(&arg.id).await?;
    print_json(&json!({ "paper_id": arg.id, "edges": edges }))
}

pub(crate) async fn run_rebuild_fts_command(ctx: &RunContext) -> Result<()> {
    let indexed = ctx.mirror.rebuild_fts().await?;
    print_json(&json!({ "indexed": indexed }))
}

pub(crate) async fn run_rebuild_citations_command(
    args: &RebuildCitationsArgs,
    ctx: &RunContext,
) -> Result<()> {
    let report = ctx
        .mirror
        .rebuild_citations(args.clean, &ctx.interrupted)
        .await?;
    print_json(&report)
}

pub(crate) async fn run_verify_command(ctx: &RunContext) -> Result<()> {
    print_json(&ctx.mirror.verify_artifacts().await?)
}
