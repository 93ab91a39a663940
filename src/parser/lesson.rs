use std::sync::LazyLock;

use regex::Regex;

use super::schedule::CandidateRecord;
use crate::db::LessonRecord;

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,2}:\d{2}$").unwrap());
static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})\.(\d{1,2})").unwrap());
static WORD_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,2})\s+([а-яё]+)").unwrap());

const MONTHS: &[(&str, u32)] = &[
    ("января", 1),
    ("февраля", 2),
    ("марта", 3),
    ("апреля", 4),
    ("мая", 5),
    ("июня", 6),
    ("июля", 7),
    ("августа", 8),
    ("сентября", 9),
    ("октября", 10),
    ("ноября", 11),
    ("декабря", 12),
];

/// Normalize a candidate into a storable record.
///
/// Returns `None` when the time range does not split into two clock values.
pub fn to_lesson(
    group_name: &str,
    week_number: u32,
    candidate: &CandidateRecord,
    default_classroom: &str,
) -> Option<LessonRecord> {
    let (start_time, end_time) = split_time_range(&candidate.time_range_text)?;

    let classroom = candidate.classroom_text.trim();
    let classroom = if classroom.is_empty() {
        default_classroom.to_string()
    } else {
        classroom.to_string()
    };

    Some(LessonRecord {
        group_name: group_name.to_string(),
        week_number,
        day_name: day_name(&candidate.day_label),
        date: candidate.raw_date_text.as_deref().and_then(parse_date),
        start_time,
        end_time,
        subject: candidate.subject_text.clone(),
        classroom,
        lesson_type: candidate.lesson_type_code.clone(),
    })
}

pub fn day_name(label: &str) -> String {
    label.split(',').next().unwrap_or_default().trim().to_string()
}

/// "09:00 – 10:30" -> ("09:00", "10:30").
pub fn split_time_range(text: &str) -> Option<(String, String)> {
    let mut parts = text.split('–').map(str::trim);
    let start = parts.next()?;
    let end = parts.next()?;
    if parts.next().is_some() || !CLOCK_RE.is_match(start) || !CLOCK_RE.is_match(end) {
        return None;
    }
    Some((start.to_string(), end.to_string()))
}

/// Accepts "08.09" style and "8 сентября" style dates, yields "DD.MM".
pub fn parse_date(text: &str) -> Option<String> {
    let text = text.trim();
    if text.contains('.') {
        let caps = NUMERIC_DATE_RE.captures(text)?;
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        return format_day_month(day, month);
    }

    let caps = WORD_DATE_RE.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month_word = caps[2].to_lowercase();
    let month = MONTHS
        .iter()
        .find(|(name, _)| *name == month_word)
        .map(|(_, n)| *n)?;
    format_day_month(day, month)
}

fn format_day_month(day: u32, month: u32) -> Option<String> {
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{:02}.{:02}", day, month))
}
