use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use schedule_scraper::config::Settings;
use schedule_scraper::coordinator;
use schedule_scraper::crawl::CrawlContext;
use schedule_scraper::db;
use schedule_scraper::filter::SubjectFilter;
use schedule_scraper::groups;
use schedule_scraper::parser::ScheduleExtractor;
use schedule_scraper::pool::SessionPool;
use schedule_scraper::session::BrowserFactory;

#[derive(Parser)]
#[command(name = "schedule_scraper", about = "Lab-session schedule crawler")]
struct Cli {
    /// TOML settings file (environment variables SCHEDULE_* override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every group and store qualifying lab sessions
    Crawl {
        /// Concurrent browser sessions (default from settings)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Rebuild and print the subjects lookup table
    Subjects,
    /// Show storage statistics
    Stats,
    /// List every group identifier the crawl covers
    Groups,
    /// Print the stored lessons of one group
    Show {
        group: String,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(path) = cli.db {
        settings.store.path = path;
    }

    let result = match cli.command {
        Commands::Crawl { workers } => {
            if let Some(n) = workers {
                settings.crawl.pool_capacity = n;
            }
            settings.crawl.validate()?;

            let conn = db::connect(&settings.store)?;
            db::init_schema(&conn)?;
            println!("Database: {}", settings.store.path.display());

            let today = chrono::Local::now().date_naive();
            let group_ids = groups::enumerate(&settings.crawl.group_prefix, today);

            let pool = SessionPool::new(BrowserFactory::new(&settings.crawl), settings.crawl.pool_capacity)
                .await
                .context("failed to start browser sessions")?;

            let filter = SubjectFilter::new(&settings.crawl.include_keywords, &settings.crawl.exclude_keywords)?;
            let extractor = ScheduleExtractor::new(filter, &settings.crawl.lab_marker);
            let ctx = Arc::new(CrawlContext {
                config: settings.crawl,
                store: settings.store,
                extractor,
                pool: Arc::clone(&pool),
            });

            let report = coordinator::run(ctx, group_ids).await;
            pool.shutdown().await;

            println!(
                "Done: {} groups ({} scanned, {} without targets, {} failed), {} new lessons.",
                report.total(),
                report.scanned,
                report.no_targets,
                report.failed,
                report.inserted
            );
            Ok(())
        }
        Commands::Subjects => {
            let conn = db::connect(&settings.store)?;
            db::init_schema(&conn)?;
            let count = db::materialize_subjects(&conn)?;
            for subject in db::fetch_subjects(&conn)? {
                println!("  {}", subject);
            }
            println!("{} unique subjects.", count);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&settings.store)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Lessons:  {}", s.lessons);
            println!("Groups:   {}", s.groups);
            println!("Subjects: {}", s.subjects);
            println!("Undated:  {}", s.undated);
            let today = chrono::Local::now().format("%d.%m").to_string();
            println!("Current week: {}", db::fetch_current_week(&conn, &today)?);
            Ok(())
        }
        Commands::Groups => {
            let today = chrono::Local::now().date_naive();
            let all = groups::enumerate(&settings.crawl.group_prefix, today);
            for g in &all {
                println!("{}", g);
            }
            println!("\n{} groups", all.len());
            Ok(())
        }
        Commands::Show { group, json } => {
            let conn = db::connect(&settings.store)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_group_lessons(&conn, &group)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if rows.is_empty() {
                println!("No lessons stored for {}.", group);
                return Ok(());
            }

            println!(
                "{:>4} | {:<6} | {:<5} | {:<11} | {:<40} | {:<10}",
                "Week", "Day", "Date", "Time", "Subject", "Room"
            );
            println!("{}", "-".repeat(92));
            for r in &rows {
                println!(
                    "{:>4} | {:<6} | {:<5} | {:<11} | {:<40} | {:<10}",
                    r.week_number,
                    truncate(&r.day_name, 6),
                    r.date.as_deref().unwrap_or("-"),
                    format!("{}–{}", r.start_time, r.end_time),
                    truncate(&r.subject, 40),
                    truncate(&r.classroom, 10),
                );
            }
            println!("\n{} lessons", rows.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
