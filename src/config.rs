use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "SCHEDULE";

const INCLUDE_KEYWORDS: &[&str] = &[
    "разработка",
    "python",
    "алгоритмы",
    "структуры данных",
    "инструментальные",
    "3d-моделирование",
    "blender",
    "машинное обучение",
    "программная инженерия",
    "мультимедиа",
    "интеллектуальной поддержки",
    "параллельные вычисления",
    "криптографии",
    "базы данных",
    "анализ больших данных",
];

const EXCLUDE_KEYWORDS: &[&str] = &["лекция", "семинар"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which check the pre-check phase runs against a week's page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrecheckGate {
    /// Keyword policy on the subject title only.
    #[default]
    SubjectOnly,
    /// Keyword policy plus the lab-type marker, same as full extraction.
    SubjectAndLab,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub base_url: String,
    pub group_prefix: String,
    pub max_weeks: u32,
    pub pre_check_weeks: u32,
    pub pool_capacity: usize,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub lab_marker: String,
    pub default_classroom: String,
    pub page_timeout_secs: u64,
    pub ready_selector: String,
    pub precheck_gate: PrecheckGate,
    pub user_agent: String,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mai.ru/education/studies/schedule/index.php".into(),
            group_prefix: "М8О".into(),
            max_weeks: 22,
            pre_check_weeks: 6,
            pool_capacity: 5,
            include_keywords: INCLUDE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            exclude_keywords: EXCLUDE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            lab_marker: "ЛР".into(),
            default_classroom: "каф. 806".into(),
            page_timeout_secs: 5,
            ready_selector: ".mb-4".into(),
            precheck_gate: PrecheckGate::SubjectOnly,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into(),
            chrome_executable: None,
        }
    }
}

impl CrawlConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn week_url(&self, group: &str, week: u32) -> String {
        format!("{}?group={}&week={}", self.base_url, group, week)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| {
            Err(ConfigError::Invalid {
                key,
                reason: reason.to_string(),
            })
        };
        if self.pool_capacity == 0 {
            return invalid("pool_capacity", "must be at least 1");
        }
        if self.max_weeks == 0 {
            return invalid("max_weeks", "must be at least 1");
        }
        if self.pre_check_weeks == 0 {
            return invalid("pre_check_weeks", "must be at least 1");
        }
        if self.pre_check_weeks > self.max_weeks {
            return invalid("pre_check_weeks", "must not exceed max_weeks");
        }
        if self.lab_marker.trim().is_empty() {
            return invalid("lab_marker", "must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/schedule.sqlite"),
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub crawl: CrawlConfig,
    pub store: StoreConfig,
}

impl Settings {
    /// Defaults, then the optional TOML file, then `SCHEDULE_*` variables
    /// (`SCHEDULE_CRAWL__POOL_CAPACITY=8`, comma-separated keyword lists).
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(file, None)
    }

    /// Same as [`Settings::load`], reading variables from `env` instead of
    /// the process environment when it is given.
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("crawl.include_keywords")
                .with_list_parse_key("crawl.exclude_keywords")
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.crawl.validate()?;
        Ok(settings)
    }
}
