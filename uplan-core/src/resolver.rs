//! Find-or-create for courses and feeds.
//!
//! Both operations are safe under concurrent identical requests: the store
//! enforces identity through uniqueness constraints and every create is a
//! conditional insert followed by a re-read, so racing callers converge on
//! the row that committed first.

use std::collections::HashSet;

use crate::{
    ClientKey, Course, CourseSet, Error, Feed, NewCourse, Result, UpstreamError,
    directory::CourseMetadata,
    path::{MAX_PATH_ATTEMPTS, PathGenerator},
    store::{FeedInsert, FeedStore},
    upstream::UpstreamClient,
};

/// Maps requests onto stored courses and feeds, creating them on first use.
#[derive(Clone)]
pub struct IdentityResolver {
    store: FeedStore,
    upstream: UpstreamClient,
    paths: PathGenerator,
}

impl IdentityResolver {
    /// `paths` draws the handles of new feeds.
    pub fn new(store: FeedStore, upstream: UpstreamClient, paths: PathGenerator) -> Self {
        Self {
            store,
            upstream,
            paths,
        }
    }

    /// The store both operations write to.
    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    /// Returns the stored course or validates it against the directory and
    /// persists it. An existing course costs no upstream call.
    pub async fn find_or_create_course(
        &self,
        path: &str,
        group: u32,
        semester: &str,
        client: &ClientKey,
    ) -> Result<Course> {
        if let Some(course) = self.store.find_course(path, group, semester).await? {
            tracing::debug!("Course {}-{} ({}) already known", path, group, semester);
            return Ok(course);
        }

        tracing::info!("Validating course {}-{} ({}) upstream", path, group, semester);
        let body = self
            .upstream
            .course_metadata(path, semester, client)
            .await?;
        let metadata = CourseMetadata::parse(&body)?;

        if !metadata.has_group(path, group) {
            return Err(UpstreamError::GroupNotFound {
                path: path.to_string(),
                group,
            }
            .into());
        }

        let course = self
            .store
            .insert_course(&NewCourse {
                path: path.to_string(),
                group,
                semester: semester.to_string(),
                name: metadata.name,
                course_type: metadata.course_type,
            })
            .await?;

        tracing::info!("Created course: {}", course.describe());
        Ok(course)
    }

    /// Returns the feed whose course set equals `courses` exactly, creating
    /// it with a fresh path when none exists.
    pub async fn find_or_create_feed(&self, courses: &[Course]) -> Result<Feed> {
        let courses = dedup_by_id(courses);
        if courses.is_empty() {
            return Err(Error::Validation("No courses provided".to_string()));
        }

        let set = CourseSet::from_courses(&courses);
        if let Some(feed) = self.store.find_feed_by_course_set(&set).await? {
            tracing::debug!("Reusing feed {} for courses [{}]", feed.path, set.canonical_key());
            return Ok(feed);
        }

        for _ in 0..MAX_PATH_ATTEMPTS {
            let path = self.paths.generate_unique_path(&self.store).await?;
            match self.store.insert_feed(&path, &courses).await? {
                FeedInsert::Created(feed) => {
                    tracing::info!(
                        "Created feed {} with {} courses",
                        feed.path,
                        courses.len()
                    );
                    return Ok(feed);
                }
                FeedInsert::Existing(feed) => {
                    tracing::debug!("Feed {} was created concurrently", feed.path);
                    return Ok(feed);
                }
                // lost a race for the path itself
                FeedInsert::PathTaken => continue,
            }
        }

        Err(Error::PathSpaceExhausted {
            attempts: MAX_PATH_ATTEMPTS,
        })
    }
}

fn dedup_by_id(courses: &[Course]) -> Vec<Course> {
    let mut seen = HashSet::new();
    courses
        .iter()
        .filter(|c| seen.insert(c.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests;
