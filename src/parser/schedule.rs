use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::config::PrecheckGate;
use crate::filter::SubjectFilter;

pub const UNKNOWN_DAY: &str = "Неизвестный день";

static DAY_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.step-content").unwrap());
static DAY_TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.step-title").unwrap());
static LESSON_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.mb-4").unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.fw-semi-bold").unwrap());
static BADGE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span.badge").unwrap());
static DETAIL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.list-inline-item").unwrap());
static MARKER_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("i.fa-map-marker-alt").unwrap());

/// One lesson block as it appears on the page, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub day_label: String,
    /// Text after the first comma of the day label, if any.
    pub raw_date_text: Option<String>,
    pub time_range_text: String,
    pub subject_text: String,
    pub lesson_type_code: String,
    pub classroom_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    pub day_label: String,
    pub lessons: Vec<CandidateRecord>,
}

/// Turns a rendered week page into the lab sessions the keyword policy accepts.
#[derive(Debug, Clone)]
pub struct ScheduleExtractor {
    filter: SubjectFilter,
    lab_marker: String,
}

impl ScheduleExtractor {
    pub fn new(filter: SubjectFilter, lab_marker: impl Into<String>) -> Self {
        Self {
            filter,
            lab_marker: lab_marker.into().to_uppercase(),
        }
    }

    /// Day sections in page order; days without a qualifying lesson are dropped.
    pub fn parse(&self, html: &str) -> Vec<DaySchedule> {
        let document = Html::parse_document(html);
        let mut days = Vec::new();

        for day in document.select(&DAY_SEL) {
            let day_label = day
                .select(&DAY_TITLE_SEL)
                .next()
                .map(joined_text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNKNOWN_DAY.to_string());

            let lessons: Vec<CandidateRecord> = day
                .select(&LESSON_SEL)
                .filter_map(|block| self.extract_lesson(block, &day_label))
                .collect();

            if !lessons.is_empty() {
                days.push(DaySchedule { day_label, lessons });
            }
        }
        days
    }

    /// Cheap presence test used before committing to a full scan.
    pub fn has_any_target(&self, html: &str, gate: PrecheckGate) -> bool {
        let document = Html::parse_document(html);
        document.select(&LESSON_SEL).any(|block| {
            let Some(title) = block.select(&TITLE_SEL).next() else {
                return false;
            };
            let (lesson_type, subject) = split_title(title);
            self.filter.matches(&subject)
                && match gate {
                    PrecheckGate::SubjectOnly => true,
                    PrecheckGate::SubjectAndLab => self.is_lab(&lesson_type),
                }
        })
    }

    fn is_lab(&self, lesson_type: &str) -> bool {
        lesson_type.contains(self.lab_marker.as_str())
    }

    fn extract_lesson(&self, block: ElementRef<'_>, day_label: &str) -> Option<CandidateRecord> {
        let title = block.select(&TITLE_SEL).next()?;
        let (lesson_type_code, subject_text) = split_title(title);

        if !self.filter.matches(&subject_text) || !self.is_lab(&lesson_type_code) {
            return None;
        }

        let mut time_range_text = String::new();
        let mut classroom_text = String::new();
        for detail in block.select(&DETAIL_SEL) {
            let text = joined_text(detail);
            if text.contains('–') {
                time_range_text = text;
            } else if detail.select(&MARKER_SEL).next().is_some() {
                classroom_text = text;
            }
        }

        Some(CandidateRecord {
            day_label: day_label.to_string(),
            raw_date_text: day_label
                .split_once(',')
                .map(|(_, rest)| rest.trim().to_string())
                .filter(|d| !d.is_empty()),
            time_range_text,
            subject_text,
            lesson_type_code,
            classroom_text,
        })
    }
}

/// Upper-cased badge token and the title with that token removed.
fn split_title(title: ElementRef<'_>) -> (String, String) {
    let full = joined_text(title);
    let badge = title
        .select(&BADGE_SEL)
        .next()
        .map(joined_text)
        .filter(|b| !b.is_empty());

    match badge {
        Some(badge) => {
            let subject = collapse_ws(&full.replace(badge.as_str(), ""));
            (badge.to_uppercase(), subject)
        }
        None => (String::new(), collapse_ws(&full)),
    }
}

fn joined_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
