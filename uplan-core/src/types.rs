use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, config::CoursePatterns};

/// A validated course offering, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Row id, the member of a [`CourseSet`].
    pub id: i64,
    /// Course number in the directory, e.g. `140135`
    pub path: String,
    /// Group (parallel session) number.
    pub group: u32,
    /// Semester code, e.g. `2024W`
    pub semester: String,
    /// Long name, German preferred over English.
    pub name: String,
    /// Type code such as VO, UE, PUE
    pub course_type: String,
}

impl Course {
    /// `<path>-<group>`, the handle used in tokens and logs.
    pub fn label(&self) -> String {
        format!("{}-{}", self.path, self.group)
    }

    /// One line summary returned to clients after feed creation.
    pub fn describe(&self) -> String {
        format!(
            "{} {} {} ({})",
            self.label(),
            self.course_type,
            self.name,
            self.semester
        )
    }
}

/// A course that passed upstream validation but has no row yet.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct NewCourse {
    pub path: String,
    pub group: u32,
    pub semester: String,
    pub name: String,
    pub course_type: String,
}

/// A persisted feed. The path is its only external handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    /// Row id.
    pub id: i64,
    /// Random URL-safe handle.
    pub path: String,
}

/// Identity of a feed: the exact set of course ids it aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSet(BTreeSet<i64>);

impl CourseSet {
    /// Collects the ids of `courses`; order and repeats do not matter.
    pub fn from_courses<'a>(courses: impl IntoIterator<Item = &'a Course>) -> Self {
        Self(courses.into_iter().map(|c| c.id).collect())
    }

    /// Collects stored ids.
    pub fn from_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Sorted, comma-joined ids. Equal sets always produce equal keys and
    /// distinct sets never do.
    pub fn canonical_key(&self) -> String {
        self.0
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether the set names no course.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A parsed course token from a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseToken {
    /// Course number.
    pub path: String,
    /// Explicit group, or the default group for a bare id.
    pub group: u32,
}

impl CourseToken {
    /// Accepts either a bare course path (implying `default_group`) or
    /// `<path>-<group>`.
    pub fn parse(raw: &str, patterns: &CoursePatterns, default_group: u32) -> Result<Self> {
        let invalid = || Error::Validation(format!("Invalid course ID format: {raw}"));

        if patterns.course_id.is_match(raw) {
            return Ok(Self {
                path: raw.to_string(),
                group: default_group,
            });
        }

        if patterns.course_id_with_group.is_match(raw) {
            let (path, group) = raw.rsplit_once('-').ok_or_else(invalid)?;
            let group = group.parse().map_err(|_| invalid())?;
            return Ok(Self {
                path: path.to_string(),
                group,
            });
        }

        Err(invalid())
    }
}

/// Where an outbound fetch is billed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// An end user, identified by network address.
    Address(String),
    /// Work done on behalf of the service itself; never rate limited.
    Internal,
}

/// Result of a feed creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedResponse {
    /// Public URL of the feed.
    pub url: String,
    /// [`Course::describe`] of every course, in feed order.
    pub courses: Vec<String>,
}
