mod common;

use std::sync::Arc;

use common::*;
use schedule_scraper::config::PrecheckGate;
use schedule_scraper::coordinator;
use schedule_scraper::crawl::{crawl_group, GroupOutcome};
use schedule_scraper::groups::{self, GroupId, Track};

fn group(ordinal: u8) -> GroupId {
    GroupId::new("М8О", 2, ordinal, Track::Bachelor, today())
}

fn lab_page(subject: &str, room: &str) -> String {
    page(&[day(
        "Вт, 16 сентября",
        &[lesson("ЛР", subject, "10:45 – 12:15", room)],
    )])
}

#[tokio::test]
async fn precheck_stops_at_first_hit() {
    let g = group(1);
    let site = Arc::new(Site::default().with_page(g.name(), 4, lab_page("Базы данных", "406")));
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(config(1), store(&dir), Arc::clone(&site)).await;

    let summary = crawl_group(&ctx, &g).await;

    let weeks = site.weeks_fetched(g.name());
    assert_eq!(&weeks[..4], &[1, 2, 3, 4]);
    assert_eq!(weeks[4..].to_vec(), (1..=22).collect::<Vec<_>>());
    assert_eq!(weeks.iter().filter(|&&w| w == 5).count(), 1);
    assert_eq!(
        summary.outcome,
        GroupOutcome::Scanned {
            weeks_with_lessons: 1,
            inserted: 1,
            skipped_weeks: 0
        }
    );
}

#[tokio::test]
async fn no_target_means_no_full_scan() {
    let g = group(2);
    let site = Arc::new(Site::default());
    let dir = tempfile::tempdir().unwrap();
    let cfg = store(&dir);
    let ctx = context(config(1), cfg.clone(), Arc::clone(&site)).await;

    let summary = crawl_group(&ctx, &g).await;

    assert_eq!(site.weeks_fetched(g.name()), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(summary.outcome, GroupOutcome::NoTargets { skipped_weeks: 0 });
    assert!(all_rows(&cfg).is_empty());
}

#[tokio::test]
async fn target_beyond_precheck_window_is_missed() {
    let g = group(3);
    let site = Arc::new(Site::default().with_page(g.name(), 9, lab_page("Базы данных", "406")));
    let dir = tempfile::tempdir().unwrap();
    let cfg = store(&dir);
    let ctx = context(config(1), cfg.clone(), Arc::clone(&site)).await;

    let summary = crawl_group(&ctx, &g).await;

    assert!(matches!(summary.outcome, GroupOutcome::NoTargets { .. }));
    assert_eq!(site.weeks_fetched(g.name()).len(), 6);
    assert!(all_rows(&cfg).is_empty());
}

fn lecture_then_lab(g: &GroupId) -> Site {
    Site::default()
        .with_page(
            g.name(),
            1,
            page(&[day(
                "Пн, 08 сентября",
                &[lesson("ЛК", "Разработка приложений на Python", "09:00 – 10:30", "501")],
            )]),
        )
        .with_page(
            g.name(),
            2,
            page(&[day(
                "Пн, 15 сентября",
                &[lesson("ЛР", "Разработка приложений на Python", "09:00 – 10:30", "406")],
            )]),
        )
}

#[tokio::test]
async fn lecture_hit_triggers_scan_with_subject_only_gate() {
    let g = group(4);
    let site = Arc::new(lecture_then_lab(&g));
    let dir = tempfile::tempdir().unwrap();
    let cfg = store(&dir);
    let ctx = context(config(1), cfg.clone(), Arc::clone(&site)).await;
    assert_eq!(ctx.config.precheck_gate, PrecheckGate::SubjectOnly);

    crawl_group(&ctx, &g).await;

    let weeks = site.weeks_fetched(g.name());
    assert_eq!(weeks[0], 1);
    assert_eq!(weeks[1..].to_vec(), (1..=22).collect::<Vec<_>>());

    let rows = all_rows(&cfg);
    assert_eq!(rows.len(), 1, "lecture must not be stored: {:?}", rows);
    assert_eq!(rows[0].week_number, 2);
    assert_eq!(rows[0].classroom, "406");
    assert_eq!(rows[0].lesson_type, "ЛР");
    assert_eq!(rows[0].date.as_deref(), Some("15.09"));
}

#[tokio::test]
async fn lab_gate_defers_precheck_hit_to_lab_week() {
    let g = group(5);
    let site = Arc::new(lecture_then_lab(&g));
    let dir = tempfile::tempdir().unwrap();
    let cfg = store(&dir);
    let mut crawl = config(1);
    crawl.precheck_gate = PrecheckGate::SubjectAndLab;
    let ctx = context(crawl, cfg.clone(), Arc::clone(&site)).await;

    crawl_group(&ctx, &g).await;

    let weeks = site.weeks_fetched(g.name());
    assert_eq!(&weeks[..2], &[1, 2]);
    assert_eq!(weeks[2..].to_vec(), (1..=22).collect::<Vec<_>>());

    let rows = all_rows(&cfg);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].week_number, 2);
    assert_eq!(rows[0].classroom, "406");
}

#[tokio::test]
async fn failing_week_is_skipped() {
    let g = group(6);
    let site = Arc::new(
        Site::default()
            .with_failure(g.name(), 1)
            .with_page(g.name(), 2, lab_page("Базы данных", "406"))
            .with_page(g.name(), 3, lab_page("Алгоритмы", "407")),
    );
    let dir = tempfile::tempdir().unwrap();
    let cfg = store(&dir);
    let ctx = context(config(1), cfg.clone(), Arc::clone(&site)).await;

    let summary = crawl_group(&ctx, &g).await;

    assert_eq!(
        summary.outcome,
        GroupOutcome::Scanned {
            weeks_with_lessons: 2,
            inserted: 2,
            skipped_weeks: 1
        }
    );
    assert_eq!(all_rows(&cfg).len(), 2);
    assert_eq!(ctx.pool.stats().free, 1);
}

#[tokio::test]
async fn all_precheck_failures_mark_group_failed() {
    let g = group(7);
    let mut site = Site::default();
    for week in 1..=6 {
        site = site.with_failure(g.name(), week);
    }
    let site = Arc::new(site);
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(config(1), store(&dir), Arc::clone(&site)).await;

    let summary = crawl_group(&ctx, &g).await;

    assert!(matches!(summary.outcome, GroupOutcome::Failed(_)));
    assert_eq!(site.weeks_fetched(g.name()).len(), 6);
    assert_eq!(ctx.pool.stats().free, 1);
}

#[tokio::test]
async fn invalid_time_dropped_missing_date_kept() {
    let g = group(8);
    let html = page(&[
        day(
            "Ср, 17 сентября",
            &[lesson("ЛР", "Машинное обучение", "скоро", "410")],
        ),
        r#"<div class="step-content">"#.to_string()
            + &lesson("ЛР", "Базы данных", "13:00 – 14:30", "")
            + "</div>",
    ]);
    let site = Arc::new(Site::default().with_page(g.name(), 1, html));
    let dir = tempfile::tempdir().unwrap();
    let cfg = store(&dir);
    let ctx = context(config(1), cfg.clone(), site).await;

    crawl_group(&ctx, &g).await;

    let rows = all_rows(&cfg);
    assert_eq!(rows.len(), 1);
    let r = &rows[0];
    assert_eq!(r.subject, "Базы данных");
    assert_eq!(r.date, None);
    assert_eq!(r.day_name, "Неизвестный день");
    assert_eq!(r.start_time, "13:00");
    assert_eq!(r.end_time, "14:30");
    assert_eq!(r.classroom, "каф. 806");
    assert_eq!(r.group_name, g.name());
}

fn busy_site(groups: &[GroupId]) -> Site {
    let mut site = Site::default();
    for (i, g) in groups.iter().enumerate() {
        if i % 3 == 0 {
            continue;
        }
        site = site
            .with_page(g.name(), 1, lab_page("Базы данных", "406"))
            .with_page(g.name(), 5, lab_page("Алгоритмы и структуры данных", "407"));
    }
    site
}

#[tokio::test]
async fn repeated_crawl_is_idempotent() {
    let all: Vec<GroupId> = groups::enumerate("М8О", today()).into_iter().take(9).collect();
    let site = Arc::new(busy_site(&all));
    let dir = tempfile::tempdir().unwrap();
    let cfg = store(&dir);

    let ctx = context(config(3), cfg.clone(), Arc::clone(&site)).await;
    let first = coordinator::run(Arc::clone(&ctx), all.clone()).await;
    let after_first = all_rows(&cfg);

    let second = coordinator::run(ctx, all.clone()).await;
    let after_second = all_rows(&cfg);

    assert_eq!(first.total(), 9);
    assert_eq!(first.scanned, 6);
    assert_eq!(first.no_targets, 3);
    assert_eq!(first.inserted, 12);
    assert_eq!(second.inserted, 0);
    assert_eq!(after_first.len(), 12);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn coordinator_respects_pool_capacity() {
    let all = groups::enumerate("М8О", today());
    let site = Arc::new(busy_site(&all[..12]));
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(config(4), store(&dir), Arc::clone(&site)).await;

    let report = coordinator::run(Arc::clone(&ctx), all.clone()).await;

    assert_eq!(report.total(), all.len());
    assert_eq!(report.failed, 0);
    assert_eq!(report.scanned + report.no_targets, all.len());
    assert!(site.max_in_flight.load(std::sync::atomic::Ordering::SeqCst) <= 4);

    let stats = ctx.pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.free, 4);
}

#[tokio::test]
async fn locked_store_does_not_stall_the_runtime() {
    let g = group(9);
    let site = Arc::new(Site::default().with_page(g.name(), 1, lab_page("Базы данных", "406")));
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = store(&dir);
    cfg.busy_timeout_ms = 2000;
    let ctx = context(config(1), cfg.clone(), site).await;

    let holder = schedule_scraper::db::connect(&cfg).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let task = {
        let ctx = Arc::clone(&ctx);
        let g = g.clone();
        tokio::spawn(async move { crawl_group(&ctx, &g).await })
    };

    // The write lock is only released if this task gets to run while the crawl waits on it.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    holder.execute_batch("COMMIT;").unwrap();

    let summary = task.await.unwrap();
    assert_eq!(
        summary.outcome,
        GroupOutcome::Scanned {
            weeks_with_lessons: 1,
            inserted: 1,
            skipped_weeks: 0
        }
    );
}
