use regex::Regex;

use crate::config::ConfigError;

/// Keyword policy for subject titles.
///
/// Exclusion is a plain substring test and always wins; inclusion requires a
/// whole-word hit on one of the include terms.
#[derive(Debug, Clone)]
pub struct SubjectFilter {
    exclude: Vec<String>,
    include: Option<Regex>,
}

impl SubjectFilter {
    /// Fails only when the include pattern exceeds the regex size limit.
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, ConfigError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let terms: Vec<String> = include
            .into_iter()
            .map(|kw| kw.as_ref().trim().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .map(|kw| regex::escape(&kw))
            .collect();

        let include = if terms.is_empty() {
            None
        } else {
            let pattern = format!(r"\b(?:{})\b", terms.join("|"));
            let re = Regex::new(&pattern).map_err(|e| ConfigError::Invalid {
                key: "include_keywords",
                reason: e.to_string(),
            })?;
            Some(re)
        };

        let exclude = exclude
            .into_iter()
            .map(|kw| kw.as_ref().trim().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .collect();

        Ok(Self { exclude, include })
    }

    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        if self.exclude.iter().any(|kw| lower.contains(kw.as_str())) {
            return false;
        }
        self.include.as_ref().is_some_and(|re| re.is_match(&lower))
    }
}
