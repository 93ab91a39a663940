use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::config::StoreConfig;

/// Opens one connection; every crawl task holds its own.
pub fn connect(store: &StoreConfig) -> Result<Connection> {
    if let Some(dir) = store.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    open(&store.path, Duration::from_millis(store.busy_timeout_ms))
}

fn open(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedule (
            id          INTEGER PRIMARY KEY,
            group_name  TEXT NOT NULL,
            week_number INTEGER NOT NULL,
            day_name    TEXT NOT NULL,
            date        TEXT,
            start_time  TEXT NOT NULL,
            end_time    TEXT NOT NULL,
            subject     TEXT NOT NULL,
            classroom   TEXT NOT NULL,
            type        TEXT NOT NULL,
            UNIQUE(group_name, week_number, day_name, start_time, subject)
        );
        CREATE INDEX IF NOT EXISTS idx_schedule_group ON schedule(group_name);
        ",
    )?;
    Ok(())
}

// ── Crawl output ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonRecord {
    pub group_name: String,
    pub week_number: u32,
    pub day_name: String,
    /// "DD.MM"; `None` when the page date could not be read.
    pub date: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub subject: String,
    pub classroom: String,
    #[serde(rename = "type")]
    pub lesson_type: String,
}

/// Insert-if-absent on the natural key. Returns whether a row was written.
pub fn insert_lesson(conn: &Connection, r: &LessonRecord) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO schedule
         (group_name, week_number, day_name, date, start_time, end_time, subject, classroom, type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    let changed = stmt.execute(rusqlite::params![
        r.group_name, r.week_number, r.day_name, r.date, r.start_time,
        r.end_time, r.subject, r.classroom, r.lesson_type,
    ])?;
    Ok(changed == 1)
}

/// Writes a whole week in one transaction; returns the number of new rows.
pub fn insert_lessons(conn: &Connection, rows: &[LessonRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    for r in rows {
        if insert_lesson(&tx, r)? {
            count += 1;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Read side ──

pub fn fetch_group_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT group_name FROM schedule ORDER BY group_name")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_group_lessons(conn: &Connection, group: &str) -> Result<Vec<LessonRecord>> {
    let mut stmt = conn.prepare(
        "SELECT group_name, week_number, day_name, date, start_time, end_time,
                subject, classroom, type
         FROM schedule
         WHERE group_name = ?1
         ORDER BY week_number, date, start_time",
    )?;
    let rows = stmt
        .query_map([group], |row| {
            Ok(LessonRecord {
                group_name: row.get(0)?,
                week_number: row.get(1)?,
                day_name: row.get(2)?,
                date: row.get(3)?,
                start_time: row.get(4)?,
                end_time: row.get(5)?,
                subject: row.get(6)?,
                classroom: row.get(7)?,
                lesson_type: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Week containing `today` ("DD.MM"), else the first week at or after it, else 1.
pub fn fetch_current_week(conn: &Connection, today: &str) -> Result<u32> {
    let exact: Option<u32> = conn
        .query_row(
            "SELECT week_number FROM schedule WHERE date = ?1 LIMIT 1",
            [today],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(week) = exact {
        return Ok(week);
    }

    let next: Option<u32> = conn
        .query_row(
            "SELECT week_number FROM schedule
             WHERE date >= ?1
             ORDER BY date
             LIMIT 1",
            [today],
            |r| r.get(0),
        )
        .optional()?;
    Ok(next.unwrap_or(1))
}

// ── Subjects projection ──

/// Rebuilds the `subjects` lookup from the distinct values in `schedule`.
pub fn materialize_subjects(conn: &Connection) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subjects (
            id           INTEGER PRIMARY KEY,
            subject_name TEXT NOT NULL UNIQUE
        );
        INSERT OR IGNORE INTO subjects (subject_name)
            SELECT DISTINCT subject FROM schedule;
        ",
    )?;
    let count: usize = tx.query_row("SELECT COUNT(*) FROM subjects", [], |r| r.get(0))?;
    tx.commit()?;
    Ok(count)
}

pub fn fetch_subjects(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT subject_name FROM subjects ORDER BY subject_name")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub lessons: usize,
    pub groups: usize,
    pub subjects: usize,
    pub undated: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let lessons: usize = conn.query_row("SELECT COUNT(*) FROM schedule", [], |r| r.get(0))?;
    let groups: usize =
        conn.query_row("SELECT COUNT(DISTINCT group_name) FROM schedule", [], |r| r.get(0))?;
    let subjects: usize =
        conn.query_row("SELECT COUNT(DISTINCT subject) FROM schedule", [], |r| r.get(0))?;
    let undated: usize =
        conn.query_row("SELECT COUNT(*) FROM schedule WHERE date IS NULL", [], |r| r.get(0))?;
    Ok(Stats {
        lessons,
        groups,
        subjects,
        undated,
    })
}
