use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::crawl::{self, CrawlContext, GroupOutcome, GroupSummary};
use crate::groups::GroupId;
use crate::session::SessionFactory;

/// Tally returned after every group task has finished.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub summaries: Vec<GroupSummary>,
    pub scanned: usize,
    pub no_targets: usize,
    pub failed: usize,
    pub inserted: usize,
}

impl CrawlReport {
    fn record(&mut self, summary: GroupSummary) {
        match &summary.outcome {
            GroupOutcome::Scanned { inserted, .. } => {
                self.scanned += 1;
                self.inserted += inserted;
            }
            GroupOutcome::NoTargets { .. } => self.no_targets += 1,
            GroupOutcome::Failed(_) => self.failed += 1,
        }
        self.summaries.push(summary);
    }

    pub fn total(&self) -> usize {
        self.summaries.len()
    }
}

/// Run one task per group, at most `pool capacity` at a time.
///
/// Summaries arrive in completion order. A failing or panicking task only
/// affects its own summary.
pub async fn run<F: SessionFactory>(ctx: Arc<CrawlContext<F>>, groups: Vec<GroupId>) -> CrawlReport {
    let workers = ctx.pool.capacity();
    let semaphore = Arc::new(Semaphore::new(workers));
    let total = groups.len();
    info!("crawling {} groups with {} workers", total, workers);

    let pb = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} groups ({eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<GroupSummary>(workers * 2);

    for group in groups {
        let ctx = Arc::clone(&ctx);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            let summary = AssertUnwindSafe(crawl::crawl_group(&ctx, &group))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| GroupSummary {
                    group: group.name().to_string(),
                    outcome: GroupOutcome::Failed("task panicked".into()),
                });
            let _ = tx.send(summary).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut report = CrawlReport::default();
    while let Some(summary) = rx.recv().await {
        match &summary.outcome {
            GroupOutcome::Failed(_) => error!("{}", summary),
            _ => info!("{}", summary),
        }
        report.record(summary);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "crawl finished: {} groups, {} scanned, {} without targets, {} failed, {} new rows",
        report.total(),
        report.scanned,
        report.no_targets,
        report.failed,
        report.inserted
    );
    report
}
