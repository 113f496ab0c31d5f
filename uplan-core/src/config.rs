//! Runtime settings, read from the process environment.

use std::{env, str::FromStr, time::Duration};

use regex::Regex;

use crate::{Error, Result, path::DEFAULT_ALPHABET};

/// Deployment configuration shared by the server and the CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    /// sqlx connection string of the feed database.
    pub database_url: String,
    /// Pool size.
    pub database_max_connections: u32,

    /// Public feed URL, `{path}` is replaced with the feed path.
    pub feed_url_template: String,
    /// Static client identifier sent with every outbound request.
    pub user_agent: String,

    /// Plain text endpoint naming the current semester.
    pub url_current_semester: String,
    /// Course metadata endpoint with `{id}` and `{semester}` placeholders.
    pub url_course_template: String,
    /// Course calendar endpoint with `{id}`, `{semester}` and `{group}` placeholders.
    pub url_ics_template: String,

    // token patterns, matched against the whole token
    /// Semester code, e.g. `2024W`.
    pub regex_current_semester: String,
    /// Bare course id.
    pub regex_course_id: String,
    /// `<id>-<group>` token.
    pub regex_course_id_with_group: String,

    /// Group assumed for a bare course id.
    pub default_group: u32,
    /// Length of newly generated feed paths.
    pub default_feed_id_length: usize,
    /// Characters newly generated feed paths are drawn from.
    pub feed_id_alphabet: String,
    /// Token limit per create request.
    pub max_courses_per_feed: usize,

    /// Length of the per-client sliding window.
    pub rate_limit_window: Duration,
    /// Upstream misses allowed per client and window.
    pub rate_limit_max_requests: u64,
    /// Lifetime of a cached upstream body.
    pub cache_ttl: Duration,
    /// Connect and request timeout of every outbound call.
    pub upstream_timeout: Duration,

    /// Take the client address from `X-Forwarded-For` instead of the socket.
    pub trust_forwarded_for: bool,
}

impl Settings {
    /// Reads every setting from the environment. The three upstream URLs are
    /// required; everything else has a default.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: var_or("DATABASE_URL", "sqlite://uplan.db"),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            feed_url_template: var_or("FEED_URL_TEMPLATE", "http://localhost:3000/ics/{path}"),
            user_agent: var_or(
                "USER_AGENT",
                concat!("uplan/", env!("CARGO_PKG_VERSION")),
            ),
            url_current_semester: required("URL_CURRENT_SEMESTER")?,
            url_course_template: required("URL_COURSE_TEMPLATE")?,
            url_ics_template: required("URL_ICS_TEMPLATE")?,
            regex_current_semester: var_or("REGEX_CURRENT_SEMESTER", r"\d{4}[SW]"),
            regex_course_id: var_or("REGEX_COURSE_ID", r"\d{6}"),
            regex_course_id_with_group: var_or("REGEX_COURSE_ID_WITH_GROUP", r"\d{6}-\d+"),
            default_group: parse_or("DEFAULT_GROUP", 1)?,
            default_feed_id_length: parse_or("DEFAULT_FEED_ID_LENGTH", 12)?,
            feed_id_alphabet: var_or("FEED_ID_ALPHABET", DEFAULT_ALPHABET),
            max_courses_per_feed: parse_or("MAX_COURSES_PER_FEED", 20)?,
            rate_limit_window: Duration::from_secs(parse_or("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_max_requests: parse_or("RATE_LIMIT_MAX_REQUESTS", 30)?,
            cache_ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", 900)?),
            upstream_timeout: Duration::from_secs(parse_or("UPSTREAM_TIMEOUT_SECS", 10)?),
            trust_forwarded_for: parse_or("TRUST_FORWARDED_FOR", false)?,
        })
    }

    /// Compiles the token patterns, anchored for full-string matching.
    pub fn patterns(&self) -> Result<CoursePatterns> {
        Ok(CoursePatterns {
            semester: full_match(&self.regex_current_semester)?,
            course_id: full_match(&self.regex_course_id)?,
            course_id_with_group: full_match(&self.regex_course_id_with_group)?,
        })
    }

    /// Public URL of the feed at `path`.
    pub fn feed_url(&self, path: &str) -> String {
        self.feed_url_template.replace("{path}", path)
    }
}

/// Token patterns compiled from [`Settings`].
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct CoursePatterns {
    pub semester: Regex,
    pub course_id: Regex,
    pub course_id_with_group: Regex,
}

fn full_match(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| Error::Config(format!("Invalid pattern '{pattern}': {e}")))
}

fn required(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("{name} environment variable is required")))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::settings;

    #[test]
    fn patterns_require_full_match() {
        let patterns = settings().patterns().unwrap();
        assert!(patterns.course_id.is_match("140135"));
        assert!(!patterns.course_id.is_match("1401350"));
        assert!(!patterns.course_id.is_match("x140135"));
        assert!(patterns.course_id_with_group.is_match("250059-2"));
        assert!(patterns.semester.is_match("2024W"));
        assert!(!patterns.semester.is_match("2024X"));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let mut s = settings();
        s.regex_course_id = "(".to_string();
        assert!(matches!(s.patterns(), Err(Error::Config(_))));
    }

    #[test]
    fn feed_url_expands_path() {
        assert_eq!(
            settings().feed_url("abc123"),
            "https://uplan.example/ics/abc123"
        );
    }
}
