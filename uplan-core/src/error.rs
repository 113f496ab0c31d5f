use thiserror::Error;

/// Coarse classification of every [`Error`], used by callers to pick a
/// response without matching on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed client input or an unresolvable request parameter.
    Validation,
    /// The requested feed does not exist.
    NotFound,
    /// The client exhausted its admission window.
    RateLimit,
    /// The directory or calendar API failed or returned unusable data.
    Upstream,
    /// Persistence, configuration or invariant failures.
    Internal,
}

/// Failures while validating a course against the directory API.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Transport failure or a non-success status.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// The body could not be parsed.
    #[error("invalid response from upstream: {0}")]
    Malformed(String),

    /// The course record carries no long name in any language.
    #[error("no name of course found")]
    MissingName,

    /// The course record carries no type.
    #[error("no type of course found (VO, PUE, ...)")]
    MissingType,

    /// The course exists but has no such group.
    #[error("group {group} not found for course {path}")]
    #[allow(missing_docs)]
    GroupNotFound { path: String, group: u32 },
}

/// Every failure surfaced by the core crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The upstream API answered, but not usefully.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Bad client input; the message is safe to show to the client.
    #[error("{0}")]
    Validation(String),

    #[error("Feed not found: {0}")]
    NotFound(String),

    /// Carries the client address.
    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("Network timeout")]
    Timeout,

    /// A failure while fetching one course of a feed, labelled with it.
    #[error("Error fetching course {course}: {source}")]
    CourseCalendar {
        /// `<id>-<group>` of the failing course.
        course: String,
        /// What went wrong.
        #[source]
        source: Box<Error>,
    },

    /// No free feed path turned up within the attempt bound.
    #[error("Unable to generate a unique feed path after {attempts} attempts, increase DEFAULT_FEED_ID_LENGTH or widen FEED_ID_ALPHABET")]
    #[allow(missing_docs)]
    PathSpaceExhausted { attempts: usize },

    #[error("Cache backend error: {0}")]
    Cache(String),

    /// Invalid settings, detected at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The kind callers map to a response.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited(_) => ErrorKind::RateLimit,
            Self::Http(_) | Self::Upstream(_) | Self::Timeout => ErrorKind::Upstream,
            Self::CourseCalendar { source, .. } => source.kind(),
            Self::Database(_)
            | Self::PathSpaceExhausted { .. }
            | Self::Cache(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Wraps a failure that happened while handling one course of a feed.
    pub fn for_course(course: impl Into<String>, source: Self) -> Self {
        Self::CourseCalendar {
            course: course.into(),
            source: Box::new(source),
        }
    }
}

/// Result alias over [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
