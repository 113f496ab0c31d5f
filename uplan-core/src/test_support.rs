//! Fixtures shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    Result, UpstreamError,
    cache::MemoryCache,
    config::Settings,
    fetch::{FetchCache, Fetcher},
    limiter::{RateLimiter, RatePolicy},
    path::DEFAULT_ALPHABET,
    upstream::{UpstreamClient, UrlTemplates},
};

pub(crate) fn settings() -> Settings {
    Settings {
        database_url: "sqlite::memory:".to_string(),
        database_max_connections: 1,
        feed_url_template: "https://uplan.example/ics/{path}".to_string(),
        user_agent: "uplan-test".to_string(),
        url_current_semester: "https://ufind.example/semester".to_string(),
        url_course_template: "https://ufind.example/courses/{id}/{semester}".to_string(),
        url_ics_template: "https://ufind.example/courses/{id}/{semester}/{group}.ics".to_string(),
        regex_current_semester: r"\d{4}[SW]".to_string(),
        regex_course_id: r"\d{6}".to_string(),
        regex_course_id_with_group: r"\d{6}-\d+".to_string(),
        default_group: 1,
        default_feed_id_length: 12,
        feed_id_alphabet: DEFAULT_ALPHABET.to_string(),
        max_courses_per_feed: 20,
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max_requests: 30,
        cache_ttl: Duration::from_secs(900),
        upstream_timeout: Duration::from_secs(10),
        trust_forwarded_for: false,
    }
}

/// Serves canned bodies by URL and counts every call. Unknown URLs fail as
/// unreachable.
#[derive(Default)]
pub(crate) struct StubFetcher {
    bodies: HashMap<String, Vec<u8>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StubFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| UpstreamError::Unreachable(format!("HTTP 404 Not Found from {url}")).into())
    }

    fn fingerprint(&self) -> &str {
        "stub"
    }
}

/// Upstream client over a fresh in-memory backend with the test settings.
pub(crate) fn upstream_with(stub: Arc<StubFetcher>) -> UpstreamClient {
    let settings = settings();
    let backend = Arc::new(MemoryCache::new());
    UpstreamClient::new(
        FetchCache::new(backend.clone(), stub, settings.cache_ttl),
        RateLimiter::new(
            backend,
            RatePolicy {
                window: settings.rate_limit_window,
                max_requests: settings.rate_limit_max_requests,
            },
        ),
        UrlTemplates::from_settings(&settings),
    )
}

/// Directory record for `path` in the upstream XML layout.
pub(crate) fn course_xml(
    path: &str,
    de: Option<&str>,
    en: Option<&str>,
    course_type: Option<&str>,
    groups: &[u32],
) -> String {
    let mut xml = format!(r#"<?xml version="1.0" encoding="UTF-8"?><course id="{path}">"#);
    if let Some(name) = de {
        xml.push_str(&format!(r#"<longname xml:lang="de">{name}</longname>"#));
    }
    if let Some(name) = en {
        xml.push_str(&format!(r#"<longname xml:lang="en">{name}</longname>"#));
    }
    if let Some(ty) = course_type {
        xml.push_str(&format!("<type>{ty}</type>"));
    }
    xml.push_str("<groups>");
    for group in groups {
        xml.push_str(&format!(r#"<group id="{path}-{group}"><wwlong>Mo 10:00</wwlong></group>"#));
    }
    xml.push_str("</groups></course>");
    xml
}

/// Calendar document with one minimal event per uid.
pub(crate) fn ics_doc(uids: &[&str]) -> String {
    let mut doc = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//ufind//EN\r\n");
    for uid in uids {
        doc.push_str(&format!(
            "BEGIN:VEVENT\r\nUID:{uid}\r\nDTSTART:20241001T080000Z\r\nSUMMARY:Lecture {uid}\r\nEND:VEVENT\r\n"
        ));
    }
    doc.push_str("END:VCALENDAR\r\n");
    doc
}
