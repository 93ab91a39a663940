use std::fmt;

use chrono::{Datelike, NaiveDate};

pub const COURSES: std::ops::RangeInclusive<u8> = 1..=4;
pub const ORDINALS: std::ops::RangeInclusive<u8> = 1..=19;

/// Study track, encoded in the group name after the ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    SpecializedHigher,
    BasicHigher,
    Bachelor,
}

impl Track {
    pub fn code(self) -> &'static str {
        match self {
            Track::SpecializedHigher => "СВ",
            Track::BasicHigher => "БВ",
            Track::Bachelor => "Б",
        }
    }

    /// Tracks that exist for a given course.
    pub fn for_course(course: u8) -> &'static [Track] {
        match course {
            1 => &[Track::SpecializedHigher, Track::BasicHigher],
            _ => &[Track::Bachelor],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    pub course: u8,
    pub ordinal: u8,
    pub track: Track,
    name: String,
}

impl GroupId {
    pub fn new(prefix: &str, course: u8, ordinal: u8, track: Track, today: NaiveDate) -> Self {
        let name = format!(
            "{}-{}{:02}{}-{}",
            prefix,
            course,
            ordinal,
            track.code(),
            admission_suffix(course, today)
        );
        Self {
            course,
            ordinal,
            track,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Two-digit admission year: the academic year rolls over in September.
pub fn admission_suffix(course: u8, today: NaiveDate) -> String {
    let end_year = if today.month() >= 9 {
        today.year() + 1
    } else {
        today.year()
    };
    let suffix = (end_year % 100 - i32::from(course)).rem_euclid(100);
    format!("{:02}", suffix)
}

/// Every group the crawl covers, course by course.
pub fn enumerate(prefix: &str, today: NaiveDate) -> Vec<GroupId> {
    let mut groups = Vec::new();
    for course in COURSES {
        for ordinal in ORDINALS {
            for &track in Track::for_course(course) {
                groups.push(GroupId::new(prefix, course, ordinal, track, today));
            }
        }
    }
    groups
}
