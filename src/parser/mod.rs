pub mod lesson;
pub mod schedule;

use crate::db::LessonRecord;
pub use schedule::{CandidateRecord, DaySchedule, ScheduleExtractor, UNKNOWN_DAY};

/// Two-step pipeline: page markup → day sections → storable records.
///
/// Candidates whose time range cannot be split are dropped here.
pub fn extract_lessons(
    extractor: &ScheduleExtractor,
    html: &str,
    group_name: &str,
    week_number: u32,
    default_classroom: &str,
) -> Vec<LessonRecord> {
    extractor
        .parse(html)
        .iter()
        .flat_map(|day| day.lessons.iter())
        .filter_map(|c| lesson::to_lesson(group_name, week_number, c, default_classroom))
        .collect()
}
