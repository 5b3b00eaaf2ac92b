//! Progress bars for sync and download runs.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mirror_core::download::{DownloadProgress, DownloadProgressFn};
use mirror_core::harvest::SyncProgressFn;

const TICK_INTERVAL: Duration = Duration::from_millis(120);

/// A bar plus the callback that drives it. The bar is hidden when disabled.
pub(crate) struct ProgressHandle<F> {
    bar: ProgressBar,
    pub(crate) callback: Option<F>,
}

impl<F> ProgressHandle<F> {
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn new_bar(enabled: bool, template: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    if !enabled {
        bar.set_draw_target(ProgressDrawTarget::hidden());
        return bar;
    }
    bar.set_style(
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(TICK_INTERVAL);
    bar
}

/// Bar counting harvested records against `completeListSize` when known.
pub(crate) fn sync_progress(enabled: bool) -> ProgressHandle<SyncProgressFn> {
    let bar = new_bar(
        enabled,
        "{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} records {msg}",
    );
    let callback = enabled.then(|| {
        let bar = bar.clone();
        let callback: SyncProgressFn = Arc::new(move |fetched, total| {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(fetched);
        });
        callback
    });
    ProgressHandle { bar, callback }
}

/// Bar counting downloaded artifacts; the message names the latest paper.
pub(crate) fn download_progress(enabled: bool) -> ProgressHandle<DownloadProgressFn> {
    let bar = new_bar(
        enabled,
        "{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} artifacts {msg}",
    );
    let callback = enabled.then(|| {
        let bar = bar.clone();
        let callback: DownloadProgressFn = Arc::new(move |event: &DownloadProgress| {
            bar.set_length(event.total);
            bar.set_position(event.downloaded);
            bar.set_message(format!("{} ({})", event.paper_id, event.kind));
        });
        callback
    });
    ProgressHandle { bar, callback }
}
