//! Feed creation and retrieval, composed from the core modules.

use std::sync::Arc;

use crate::{
    ClientKey, CourseToken, Error, FeedResponse, Result,
    cache::SharedBackend,
    config::{CoursePatterns, Settings},
    fetch::{FetchCache, Fetcher},
    ics::CalendarAggregator,
    limiter::{RateLimiter, RatePolicy},
    path::{PathGenerator, is_plausible_path},
    resolver::IdentityResolver,
    semester::{resolve_current_semester, validate_semester},
    store::FeedStore,
    upstream::{UpstreamClient, UrlTemplates},
};

/// The two request flows, create and render, over one set of modules.
#[derive(Clone)]
pub struct FeedService {
    settings: Arc<Settings>,
    patterns: CoursePatterns,
    upstream: UpstreamClient,
    resolver: IdentityResolver,
    aggregator: CalendarAggregator,
}

impl FeedService {
    /// Wires every module from `settings`. Invalid patterns or path
    /// settings are `Error::Config`.
    pub fn new(
        settings: Settings,
        backend: SharedBackend,
        fetcher: Arc<dyn Fetcher>,
        store: FeedStore,
    ) -> Result<Self> {
        let patterns = settings.patterns()?;
        let paths =
            PathGenerator::with_alphabet(settings.default_feed_id_length, &settings.feed_id_alphabet)?;

        let upstream = UpstreamClient::new(
            FetchCache::new(backend.clone(), fetcher, settings.cache_ttl),
            RateLimiter::new(
                backend,
                RatePolicy {
                    window: settings.rate_limit_window,
                    max_requests: settings.rate_limit_max_requests,
                },
            ),
            UrlTemplates::from_settings(&settings),
        );
        let resolver = IdentityResolver::new(store, upstream.clone(), paths);

        Ok(Self {
            settings: Arc::new(settings),
            patterns,
            upstream,
            resolver,
            aggregator: CalendarAggregator::new(),
        })
    }

    /// Asks the directory; never billed to a client.
    pub async fn current_semester(&self) -> Result<String> {
        resolve_current_semester(&self.upstream, &self.patterns).await
    }

    /// Parses the comma separated `courses` tokens and returns the feed that
    /// aggregates them, creating courses and the feed as needed.
    pub async fn create_feed(
        &self,
        courses: &str,
        semester: Option<&str>,
        client: &ClientKey,
    ) -> Result<FeedResponse> {
        let tokens = self.parse_tokens(courses)?;

        let semester = match semester.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => validate_semester(raw, &self.patterns)?,
            None => self.current_semester().await?,
        };

        let mut resolved = Vec::with_capacity(tokens.len());
        for token in &tokens {
            let course = self
                .resolver
                .find_or_create_course(&token.path, token.group, &semester, client)
                .await?;
            if !resolved.contains(&course) {
                resolved.push(course);
            }
        }

        let feed = self.resolver.find_or_create_feed(&resolved).await?;

        Ok(FeedResponse {
            url: self.settings.feed_url(&feed.path),
            courses: resolved.iter().map(|c| c.describe()).collect(),
        })
    }

    fn parse_tokens(&self, courses: &str) -> Result<Vec<CourseToken>> {
        let raw: Vec<&str> = courses
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        if raw.is_empty() {
            return Err(Error::Validation("No courses provided".to_string()));
        }
        if raw.len() > self.settings.max_courses_per_feed {
            return Err(Error::Validation(format!(
                "Too many courses requested, maximum is {}",
                self.settings.max_courses_per_feed
            )));
        }

        raw.into_iter()
            .map(|t| CourseToken::parse(t, &self.patterns, self.settings.default_group))
            .collect()
    }

    /// Renders the merged calendar of the feed at `path`.
    pub async fn render_feed(&self, path: &str, client: &ClientKey) -> Result<String> {
        let not_found = || Error::NotFound(path.to_string());

        if !is_plausible_path(path) {
            return Err(not_found());
        }

        let store = self.resolver.store();
        let feed = store.find_feed_by_path(path).await?.ok_or_else(not_found)?;
        let courses = store.feed_courses(feed.id).await?;

        let calendar = self
            .aggregator
            .aggregate(&self.upstream, &feed.path, &courses, client)
            .await?;

        tracing::info!("Served feed {} ({} courses)", feed.path, courses.len());
        Ok(calendar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ErrorKind,
        cache::MemoryCache,
        test_support::{StubFetcher, course_xml, ics_doc, settings},
    };

    const SEMESTER: &str = "https://ufind.example/semester";

    fn stub() -> Arc<StubFetcher> {
        Arc::new(
            StubFetcher::new()
                .with(SEMESTER, "2024W\n")
                .with(
                    "https://ufind.example/courses/140135/2024W",
                    course_xml("140135", Some("Analysis"), None, Some("VO"), &[1]),
                )
                .with(
                    "https://ufind.example/courses/250059/2024W",
                    course_xml("250059", Some("Algebra"), None, Some("UE"), &[1, 2]),
                )
                .with(
                    "https://ufind.example/courses/140135/2025S",
                    course_xml("140135", Some("Analysis 2"), None, Some("VO"), &[1]),
                )
                .with(
                    "https://ufind.example/courses/140135/2024W/1.ics",
                    ics_doc(&["analysis-1", "analysis-2"]),
                )
                .with(
                    "https://ufind.example/courses/250059/2024W/2.ics",
                    ics_doc(&["algebra-1"]),
                ),
        )
    }

    async fn service_with(settings: Settings, stub: Arc<StubFetcher>) -> FeedService {
        service_on(settings, stub, FeedStore::in_memory().await.unwrap())
    }

    fn service_on(settings: Settings, stub: Arc<StubFetcher>, store: FeedStore) -> FeedService {
        FeedService::new(settings, Arc::new(MemoryCache::new()), stub, store).unwrap()
    }

    fn client() -> ClientKey {
        ClientKey::Address("10.0.0.1".to_string())
    }

    #[tokio::test]
    async fn create_then_render() {
        let stub = stub();
        let service = service_with(settings(), stub.clone()).await;

        let response = service
            .create_feed("140135,250059-2", None, &client())
            .await
            .unwrap();
        assert_eq!(
            response.courses,
            vec![
                "140135-1 VO Analysis (2024W)".to_string(),
                "250059-2 UE Algebra (2024W)".to_string(),
            ]
        );
        let path = response
            .url
            .strip_prefix("https://uplan.example/ics/")
            .unwrap()
            .to_string();

        let calendar = service.render_feed(&path, &client()).await.unwrap();
        let uids: Vec<&str> = calendar
            .lines()
            .filter_map(|l| l.strip_prefix("UID:"))
            .collect();
        assert_eq!(uids, vec!["analysis-1", "analysis-2", "algebra-1"]);
        assert_eq!(calendar.matches("BEGIN:VCALENDAR").count(), 1);

        // same set in another order with an explicit semester
        let again = service
            .create_feed(" 250059-2 , 140135,", Some("2024W"), &client())
            .await
            .unwrap();
        assert_eq!(again.url, response.url);
        assert_eq!(stub.calls("https://ufind.example/courses/140135/2024W"), 1);
    }

    #[tokio::test]
    async fn duplicate_tokens_collapse() {
        let service = service_with(settings(), stub()).await;
        let response = service
            .create_feed("140135,140135-1", Some("2024W"), &client())
            .await
            .unwrap();
        assert_eq!(response.courses, vec!["140135-1 VO Analysis (2024W)".to_string()]);
    }

    #[tokio::test]
    async fn semester_changes_course_identity() {
        let service = service_with(settings(), stub()).await;
        let winter = service.create_feed("140135", Some("2024W"), &client()).await.unwrap();
        let summer = service.create_feed("140135", Some("2025S"), &client()).await.unwrap();
        assert_ne!(winter.url, summer.url);
        assert_eq!(summer.courses, vec!["140135-1 VO Analysis 2 (2025S)".to_string()]);
    }

    #[tokio::test]
    async fn tokens_are_validated_before_any_upstream_call() {
        let stub = stub();
        let service = service_with(settings(), stub.clone()).await;

        let err = service
            .create_feed("140135,nope", None, &client())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("nope"));
        assert_eq!(stub.calls(SEMESTER), 0);

        let err = service.create_feed(" , ", None, &client()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = service
            .create_feed("140135", Some("summer"), &client())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn too_many_courses() {
        let mut settings = settings();
        settings.max_courses_per_feed = 2;
        let service = service_with(settings, stub()).await;

        let err = service
            .create_feed("140135,250059-2,260001", Some("2024W"), &client())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unresolved_semester_is_validation_error() {
        let service = service_with(settings(), Arc::new(StubFetcher::new())).await;
        let err = service.create_feed("140135", None, &client()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unknown_feeds_are_not_found() {
        let service = service_with(settings(), stub()).await;
        for path in ["abcdefghijkl", "short", "ABCDEFGHIJKL", "../etc/passw", ""] {
            let err = service.render_feed(path, &client()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "{path}");
        }
    }

    #[tokio::test]
    async fn feeds_survive_path_setting_changes() {
        let stub = stub();
        let store = FeedStore::in_memory().await.unwrap();

        let before = service_on(settings(), stub.clone(), store.clone());
        let response = before
            .create_feed("140135", Some("2024W"), &client())
            .await
            .unwrap();
        let path = response.url.rsplit('/').next().unwrap().to_string();
        assert_eq!(path.len(), 12);

        let mut longer = settings();
        longer.default_feed_id_length = 16;
        longer.feed_id_alphabet = "ABCDEFGH".to_string();
        let after = service_on(longer, stub, store);

        let calendar = after.render_feed(&path, &client()).await.unwrap();
        assert!(calendar.contains("UID:analysis-1"));

        let fresh = after.create_feed("250059-2", Some("2024W"), &client()).await.unwrap();
        let fresh_path = fresh.url.rsplit('/').next().unwrap();
        assert_eq!(fresh_path.len(), 16);
        assert!(fresh_path.chars().all(|c| ('A'..='H').contains(&c)));
    }

    #[tokio::test]
    async fn unsafe_alphabet_is_a_config_error() {
        let mut settings = settings();
        settings.feed_id_alphabet = "ab/".to_string();
        let err = FeedService::new(
            settings,
            Arc::new(MemoryCache::new()),
            stub(),
            FeedStore::in_memory().await.unwrap(),
        )
        .err();
        assert!(matches!(err, Some(Error::Config(_))));
    }

    #[tokio::test]
    async fn rate_limited_render_maps_to_rate_limit() {
        let mut settings = settings();
        settings.rate_limit_max_requests = 3;
        let stub = stub();
        let service = service_with(settings, stub).await;

        // semester lookup is internal, the two metadata fetches are billed
        let response = service
            .create_feed("140135,250059-2", None, &client())
            .await
            .unwrap();
        let path = response.url.rsplit('/').next().unwrap().to_string();

        // first calendar fetch uses the last unit, the second is denied
        let err = service.render_feed(&path, &client()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.to_string().contains("250059-2"));

        // another client is unaffected and served partly from cache
        let other = ClientKey::Address("10.0.0.2".to_string());
        assert!(service.render_feed(&path, &other).await.is_ok());
    }
}
