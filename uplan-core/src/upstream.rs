use crate::{
    ClientKey, Course, Error, Result,
    config::Settings,
    fetch::FetchCache,
    limiter::{Admission, RateLimiter},
};

/// URL templates of the directory and calendar APIs.
#[derive(Debug, Clone)]
pub struct UrlTemplates {
    /// Plain text current-semester endpoint.
    pub current_semester: String,
    /// Course metadata, `{id}` and `{semester}`.
    pub course: String,
    /// Course calendar, `{id}`, `{semester}` and `{group}`.
    pub ics: String,
}

impl UrlTemplates {
    /// Copies the three templates out of `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            current_semester: settings.url_current_semester.clone(),
            course: settings.url_course_template.clone(),
            ics: settings.url_ics_template.clone(),
        }
    }

    /// Metadata URL of one course offering.
    pub fn course_url(&self, path: &str, semester: &str) -> String {
        self.course
            .replace("{id}", path)
            .replace("{semester}", semester)
    }

    /// Calendar URL of one course group.
    pub fn ics_url(&self, path: &str, semester: &str, group: u32) -> String {
        self.ics
            .replace("{id}", path)
            .replace("{semester}", semester)
            .replace("{group}", &group.to_string())
    }
}

/// Every outbound call goes through here. A client whose window is full is
/// denied before the cache is consulted; cache hits are free; every miss
/// takes a window slot before the network is touched, whatever the fetch
/// then returns.
#[derive(Clone)]
pub struct UpstreamClient {
    cache: FetchCache,
    limiter: RateLimiter,
    urls: UrlTemplates,
}

impl UpstreamClient {
    /// Composes the cache and the limiter for every call.
    pub fn new(cache: FetchCache, limiter: RateLimiter, urls: UrlTemplates) -> Self {
        Self {
            cache,
            limiter,
            urls,
        }
    }

    /// GET `url` on behalf of `client`.
    pub async fn fetch(&self, url: &str, client: &ClientKey) -> Result<Vec<u8>> {
        let ClientKey::Address(address) = client else {
            return Ok(self.cache.get_or_fetch(url).await?.body);
        };

        if self.limiter.admit(address).await? == Admission::Denied {
            return Err(Error::RateLimited(address.clone()));
        }

        if let Some(body) = self.cache.lookup(url).await? {
            return Ok(body);
        }

        // the slot is taken before the network is touched and kept whatever
        // the fetch returns
        if self.limiter.reserve(address).await? == Admission::Denied {
            return Err(Error::RateLimited(address.clone()));
        }

        self.cache.fetch_and_store(url).await
    }

    /// Directory record of `path` in `semester`, billed to `client`.
    pub async fn course_metadata(
        &self,
        path: &str,
        semester: &str,
        client: &ClientKey,
    ) -> Result<Vec<u8>> {
        self.fetch(&self.urls.course_url(path, semester), client)
            .await
    }

    /// Calendar document of `course`, billed to `client`.
    pub async fn course_calendar(&self, course: &Course, client: &ClientKey) -> Result<Vec<u8>> {
        let url = self
            .urls
            .ics_url(&course.path, &course.semester, course.group);
        self.fetch(&url, client).await
    }

    /// Not billable to any client.
    pub async fn current_semester(&self) -> Result<Vec<u8>> {
        self.fetch(&self.urls.current_semester, &ClientKey::Internal)
            .await
    }
}
