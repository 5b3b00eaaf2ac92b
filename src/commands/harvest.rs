//! `sync`, `download` and `fetch` handlers.

use std::sync::atomic::Ordering;

use anyhow::Result;
use mirror_core::{DownloadOptions, DownloadTarget, FetchOptions, SyncFilter, SyncOptions};
use tracing::{info, warn};

use super::{RunContext, print_json};
use crate::cli::{DownloadArgs, FetchArgs, SyncArgs};
use crate::progress::{download_progress, sync_progress};

pub(crate) async fn run_sync_command(args: &SyncArgs, ctx: &RunContext) -> Result<()> {
    let filter = SyncFilter {
        set: args.set.clone(),
        from: args.from,
        until: args.until,
    };
    let progress = sync_progress(ctx.show_progress);
    let options = SyncOptions {
        batch_size: args
            .batch_size
            .map_or(ctx.settings.batch_size, |b| usize::try_from(b).unwrap_or(usize::MAX)),
        restart: args.restart,
        max_retries: args.max_retries.unwrap_or(ctx.settings.max_retries),
        request_interval: ctx.settings.rate_limit,
        progress: progress.callback.clone(),
        ..SyncOptions::default()
    };

    info!(%filter, batch_size = options.batch_size, "starting sync");
    let result = ctx
        .mirror
        .sync_metadata(filter, &options, &ctx.interrupted)
        .await;
    progress.finish();

    let report = result?;
    if report.interrupted {
        warn!(committed = report.committed, "sync interrupted; run again to resume");
    }
    print_json(&report)
}

pub(crate) async fn run_download_command(args: DownloadArgs, ctx: &RunContext) -> Result<()> {
    let target = match args.category {
        Some(category) => DownloadTarget::Category(category),
        None => DownloadTarget::Ids(args.ids),
    };
    let progress = download_progress(ctx.show_progress);
    let options = DownloadOptions {
        concurrency: args
            .concurrency
            .map_or(ctx.settings.concurrency, usize::from),
        rate_limit_interval: ctx.settings.rate_limit,
        download_pdf: !args.no_pdf,
        download_source: !args.no_source,
        max_retries: args.max_retries.unwrap_or(ctx.settings.max_retries),
        progress: progress.callback.clone(),
        ..DownloadOptions::default()
    };

    let result = ctx
        .mirror
        .download(target, options, ctx.interrupted.clone())
        .await;
    progress.finish();

    let report = result?;
    info!(
        downloaded = report.downloaded,
        failed = report.failed,
        retried = report.retried,
        "download complete"
    );
    print_json(&report)
}

pub(crate) async fn run_fetch_command(args: &FetchArgs, ctx: &RunContext) -> Result<()> {
    if args.metadata_only {
        let report = ctx
            .mirror
            .fetch_metadata_batch(&args.ids, &ctx.interrupted)
            .await?;
        return print_json(&report);
    }

    let options = FetchOptions {
        pdf: args.pdf,
        source: !args.no_source,
    };
    let mut papers = Vec::with_capacity(args.ids.len());
    for id in &args.ids {
        if ctx.interrupted.load(Ordering::SeqCst) {
            break;
        }
        papers.push(
            ctx.mirror
                .fetch_and_download(id, options, ctx.interrupted.clone())
                .await?,
        );
    }
    print_json(&papers)
}
