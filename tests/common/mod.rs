#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use schedule_scraper::config::{CrawlConfig, StoreConfig};
use schedule_scraper::crawl::CrawlContext;
use schedule_scraper::db::{self, LessonRecord};
use schedule_scraper::filter::SubjectFilter;
use schedule_scraper::parser::ScheduleExtractor;
use schedule_scraper::pool::SessionPool;
use schedule_scraper::session::{FetchError, Session, SessionFactory};

pub const BASE_URL: &str = "http://schedule.test/index.php";

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 14).unwrap()
}

pub fn config(pool_capacity: usize) -> CrawlConfig {
    CrawlConfig {
        base_url: BASE_URL.into(),
        pool_capacity,
        ..Default::default()
    }
}

pub fn url(group: &str, week: u32) -> String {
    format!("{}?group={}&week={}", BASE_URL, group, week)
}

// ── HTML builders ──

pub fn lesson(badge: &str, subject: &str, time: &str, room: &str) -> String {
    format!(
        r#"<div class="mb-4">
             <p class="fw-semi-bold text-dark">{subject} <span class="badge">{badge}</span></p>
             <ul class="list-inline">
               <li class="list-inline-item"><i class="far fa-clock"></i> {time}</li>
               <li class="list-inline-item"><i class="fas fa-map-marker-alt"></i> {room}</li>
             </ul>
           </div>"#
    )
}

pub fn day(title: &str, lessons: &[String]) -> String {
    format!(
        r#"<div class="step-content"><span class="step-title">{title}</span>{}</div>"#,
        lessons.concat()
    )
}

pub fn page(days: &[String]) -> String {
    format!("<html><body>{}</body></html>", days.concat())
}

pub fn filler_page() -> String {
    page(&[day(
        "Пн, 08 сентября",
        &[lesson("ЛК", "Физика", "09:00 – 10:30", "101")],
    )])
}

// ── Fake sessions ──

/// Page content keyed by URL; unknown URLs serve a page without targets.
#[derive(Default)]
pub struct Site {
    pages: HashMap<String, String>,
    failing: HashSet<String>,
    pub fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Site {
    pub fn with_page(mut self, group: &str, week: u32, html: String) -> Self {
        self.pages.insert(url(group, week), html);
        self
    }

    pub fn with_failure(mut self, group: &str, week: u32) -> Self {
        self.failing.insert(url(group, week));
        self
    }

    /// Fetched week numbers for one group, in request order.
    pub fn weeks_fetched(&self, group: &str) -> Vec<u32> {
        let prefix = format!("{}?group={}&week=", BASE_URL, group);
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| u.strip_prefix(&prefix)?.parse().ok())
            .collect()
    }
}

pub struct FakeSession {
    site: Arc<Site>,
}

#[async_trait]
impl Session for FakeSession {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let now = self.site.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.site.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.site.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.site.fetched.lock().unwrap().push(url.to_string());
        if self.site.failing.contains(url) {
            return Err(FetchError::Timeout {
                url: url.to_string(),
                waited: Duration::from_secs(5),
            });
        }
        Ok(self.site.pages.get(url).cloned().unwrap_or_else(filler_page))
    }

    async fn is_alive(&mut self) -> bool {
        true
    }

    async fn close(self) {}
}

pub struct FakeFactory {
    pub site: Arc<Site>,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn create(&self) -> Result<FakeSession, FetchError> {
        Ok(FakeSession {
            site: Arc::clone(&self.site),
        })
    }
}

// ── Wiring ──

pub fn store(dir: &tempfile::TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("schedule.sqlite"),
        busy_timeout_ms: 5000,
    }
}

pub async fn context(
    config: CrawlConfig,
    store: StoreConfig,
    site: Arc<Site>,
) -> Arc<CrawlContext<FakeFactory>> {
    let conn = db::connect(&store).unwrap();
    db::init_schema(&conn).unwrap();

    let pool = SessionPool::new(FakeFactory { site }, config.pool_capacity)
        .await
        .unwrap();
    let extractor = ScheduleExtractor::new(
        SubjectFilter::new(&config.include_keywords, &config.exclude_keywords).unwrap(),
        &config.lab_marker,
    );
    Arc::new(CrawlContext {
        config,
        store,
        extractor,
        pool,
    })
}

pub fn all_rows(store: &StoreConfig) -> Vec<LessonRecord> {
    let conn = db::connect(store).unwrap();
    let mut rows = Vec::new();
    for group in db::fetch_group_names(&conn).unwrap() {
        rows.extend(db::fetch_group_lessons(&conn, &group).unwrap());
    }
    rows
}
