//! One group's crawl: pre-check a few weeks, then scan the whole term.
//!
//! A group with no target subject in the first `pre_check_weeks` weeks is
//! assumed to have none at all. Failures are scoped to the week that hit
//! them; the task always runs to the end and returns its session.

use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{CrawlConfig, StoreConfig};
use crate::db::{self, LessonRecord};
use crate::groups::GroupId;
use crate::parser::{self, ScheduleExtractor};
use crate::pool::SessionPool;
use crate::session::{FetchError, Session, SessionFactory};

/// Everything a group task needs, shared by all tasks of a crawl.
pub struct CrawlContext<F: SessionFactory> {
    pub config: CrawlConfig,
    pub store: StoreConfig,
    pub extractor: ScheduleExtractor,
    pub pool: Arc<SessionPool<F>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreCheck,
    FullScan,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PreCheck => "pre-check",
            Phase::FullScan => "full scan",
        })
    }
}

#[derive(Debug, Error)]
pub enum SkipReason {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("store write failed: {0:#}")]
    Store(anyhow::Error),
}

/// Result of processing a single (group, week).
#[derive(Debug)]
pub enum WeekOutcome {
    /// Pre-check found a target subject.
    Hit,
    /// Pre-check page had no target subject.
    Miss,
    /// Full-scan week: qualifying lessons found and rows newly written.
    Stored { found: usize, inserted: usize },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    Scanned {
        weeks_with_lessons: usize,
        inserted: usize,
        skipped_weeks: usize,
    },
    NoTargets {
        skipped_weeks: usize,
    },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSummary {
    pub group: String,
    pub outcome: GroupOutcome,
}

impl fmt::Display for GroupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            GroupOutcome::Scanned {
                weeks_with_lessons,
                inserted,
                ..
            } => write!(
                f,
                "{}: {} weeks with lessons, {} new rows",
                self.group, weeks_with_lessons, inserted
            ),
            GroupOutcome::NoTargets { .. } => write!(f, "{}: no target subjects", self.group),
            GroupOutcome::Failed(reason) => write!(f, "{}: failed ({})", self.group, reason),
        }
    }
}

pub async fn crawl_group<F: SessionFactory>(ctx: &CrawlContext<F>, group: &GroupId) -> GroupSummary {
    let name = group.name();
    let outcome = match ctx.pool.acquire().await {
        Ok(mut lease) => {
            let outcome = run_phases(ctx, name, lease.session()).await;
            lease.release().await;
            outcome
        }
        Err(e) => {
            error!(group = %name, "no session available: {}", e);
            GroupOutcome::Failed(format!("no session: {}", e))
        }
    };
    GroupSummary {
        group: name.to_string(),
        outcome,
    }
}

async fn run_phases<F: SessionFactory>(
    ctx: &CrawlContext<F>,
    group: &str,
    session: &mut F::Session,
) -> GroupOutcome {
    info!(group, "checking group");

    let mut skipped = 0;
    let mut found = false;
    for week in 1..=ctx.config.pre_check_weeks {
        match precheck_week(ctx, session, group, week).await {
            WeekOutcome::Hit => {
                found = true;
                break;
            }
            WeekOutcome::Skipped(reason) => {
                warn!(group, week, phase = %Phase::PreCheck, "week skipped: {}", reason);
                skipped += 1;
            }
            _ => {}
        }
    }

    if !found {
        if skipped == ctx.config.pre_check_weeks as usize {
            return GroupOutcome::Failed("every pre-check week failed".into());
        }
        return GroupOutcome::NoTargets {
            skipped_weeks: skipped,
        };
    }

    let mut conn = match db::connect(&ctx.store) {
        Ok(conn) => conn,
        Err(e) => {
            error!(group, "cannot open store: {:#}", e);
            return GroupOutcome::Failed(format!("store: {:#}", e));
        }
    };

    info!(group, "target subjects found, scanning all weeks");
    let mut weeks_with_lessons = 0;
    let mut inserted = 0;
    let mut skipped_weeks = 0;
    for week in 1..=ctx.config.max_weeks {
        let outcome = match scan_week(ctx, session, group, week).await {
            Ok(lessons) => {
                // Writes may wait on the busy timeout, so they run off the async workers.
                let stored = tokio::task::spawn_blocking(move || {
                    let outcome = store_week(&conn, &lessons);
                    (conn, outcome)
                })
                .await;
                match stored {
                    Ok((back, outcome)) => {
                        conn = back;
                        outcome
                    }
                    Err(e) => {
                        error!(group, week, "store task failed: {}", e);
                        return GroupOutcome::Failed(format!("store task: {}", e));
                    }
                }
            }
            Err(e) => WeekOutcome::Skipped(e.into()),
        };
        match outcome {
            WeekOutcome::Stored { found, inserted: n } => {
                if found > 0 {
                    weeks_with_lessons += 1;
                }
                inserted += n;
            }
            WeekOutcome::Skipped(reason) => {
                warn!(group, week, phase = %Phase::FullScan, "week skipped: {}", reason);
                skipped_weeks += 1;
            }
            _ => {}
        }
    }

    GroupOutcome::Scanned {
        weeks_with_lessons,
        inserted,
        skipped_weeks,
    }
}

async fn precheck_week<F: SessionFactory>(
    ctx: &CrawlContext<F>,
    session: &mut F::Session,
    group: &str,
    week: u32,
) -> WeekOutcome {
    let html = match fetch(ctx, session, group, week).await {
        Ok(html) => html,
        Err(e) => return WeekOutcome::Skipped(e.into()),
    };
    if ctx.extractor.has_any_target(&html, ctx.config.precheck_gate) {
        WeekOutcome::Hit
    } else {
        WeekOutcome::Miss
    }
}

async fn scan_week<F: SessionFactory>(
    ctx: &CrawlContext<F>,
    session: &mut F::Session,
    group: &str,
    week: u32,
) -> Result<Vec<LessonRecord>, FetchError> {
    let html = fetch(ctx, session, group, week).await?;
    Ok(parser::extract_lessons(
        &ctx.extractor,
        &html,
        group,
        week,
        &ctx.config.default_classroom,
    ))
}

fn store_week(conn: &Connection, lessons: &[LessonRecord]) -> WeekOutcome {
    match db::insert_lessons(conn, lessons) {
        Ok(inserted) => WeekOutcome::Stored {
            found: lessons.len(),
            inserted,
        },
        Err(e) => WeekOutcome::Skipped(SkipReason::Store(e)),
    }
}

async fn fetch<F: SessionFactory>(
    ctx: &CrawlContext<F>,
    session: &mut F::Session,
    group: &str,
    week: u32,
) -> Result<String, FetchError> {
    let url = ctx.config.week_url(group, week);
    debug!(group, week, "fetching {}", url);
    session.fetch(&url).await
}
