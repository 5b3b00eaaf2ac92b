//! Read-only handlers.

use anyhow::Result;
use mirror_core::PaperId;
use serde::Serialize;

use super::{RunContext, print_json};
use crate::cli::{CitedByArgs, PaperArg, SearchArgs};

#[derive(Serialize)]
struct CitedByOutput {
    paper_id: PaperId,
    count: u64,
    citers: Vec<PaperId>,
}

pub(crate) async fn run_show_command(arg: &PaperArg, ctx: &RunContext) -> Result<()> {
    let paper = ctx.mirror.get_paper(&arg.id).await?;
    print_json(paper.as_ref())
}

pub(crate) async fn run_refs_command(arg: &PaperArg, ctx: &RunContext) -> Result<()> {
    print_json(&ctx.mirror.references(&arg.id).await?)
}

pub(crate) async fn run_cited_by_command(args: &CitedByArgs, ctx: &RunContext) -> Result<()> {
    let output = CitedByOutput {
        paper_id: args.id.clone(),
        count: ctx.mirror.cited_by_count(&args.id).await?,
        citers: ctx.mirror.cited_by(&args.id, args.limit).await?,
    };
    print_json(&output)
}

pub(crate) async fn run_graph_command(arg: &PaperArg, ctx: &RunContext) -> Result<()> {
    print_json(&ctx.mirror.citation_graph(&arg.id).await?)
}

pub(crate) async fn run_categories_command(ctx: &RunContext) -> Result<()> {
    print_json(&ctx.mirror.list_categories().await?)
}

pub(crate) async fn run_stats_command(ctx: &RunContext) -> Result<()> {
    print_json(&ctx.mirror.stats().await?)
}

pub(crate) async fn run_search_command(args: &SearchArgs, ctx: &RunContext) -> Result<()> {
    let query = args.query.join(" ");
    let hits = ctx
        .mirror
        .search(&query, args.category.as_deref(), args.limit)
        .await?;
    print_json(&hits)
}
