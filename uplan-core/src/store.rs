//! Relational store for courses, feeds and their association.

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use sqlx::{
    FromRow, Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::{
    Course, CourseSet, Error, Feed, NewCourse, Result,
    path::PathLookup,
};

const SCHEMA: [&str; 4] = [
    r#"CREATE TABLE IF NOT EXISTS course (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        course_group INTEGER NOT NULL,
        semester TEXT NOT NULL,
        name TEXT NOT NULL,
        course_type TEXT NOT NULL,
        UNIQUE (path, course_group, semester)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS feed (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL UNIQUE,
        course_set TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS feed_course (
        feed_id INTEGER NOT NULL REFERENCES feed(id) ON DELETE CASCADE,
        course_id INTEGER NOT NULL REFERENCES course(id),
        position INTEGER NOT NULL,
        PRIMARY KEY (feed_id, course_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_feed_course_course ON feed_course(course_id)",
];

#[derive(Debug, FromRow)]
struct CourseRow {
    id: i64,
    path: String,
    course_group: i64,
    semester: String,
    name: String,
    course_type: String,
}

impl TryFrom<CourseRow> for Course {
    type Error = Error;

    fn try_from(row: CourseRow) -> Result<Self> {
        let group = u32::try_from(row.course_group)
            .map_err(|_| Error::Internal(format!("course {} has group {}", row.id, row.course_group)))?;
        Ok(Self {
            id: row.id,
            path: row.path,
            group,
            semester: row.semester,
            name: row.name,
            course_type: row.course_type,
        })
    }
}

#[derive(Debug, FromRow)]
struct FeedRow {
    id: i64,
    path: String,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
        }
    }
}

/// Outcome of a conditional feed insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedInsert {
    Created(Feed),
    /// A feed with the same course set already existed (possibly created
    /// concurrently); nothing was written.
    Existing(Feed),
    /// The candidate path belongs to another feed; nothing was written.
    PathTaken,
}

/// SQLite persistence for courses and feeds.
#[derive(Debug, Clone)]
pub struct FeedStore {
    pool: Pool<Sqlite>,
}

impl FeedStore {
    /// Opens (creating if missing) the database at `url` and applies the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!("Database ready at {}", url);
        Ok(store)
    }

    /// Private in-memory database. A single connection that is never
    /// recycled keeps the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// The course with this identity, if stored.
    pub async fn find_course(
        &self,
        path: &str,
        group: u32,
        semester: &str,
    ) -> Result<Option<Course>> {
        sqlx::query_as::<_, CourseRow>(
            "SELECT * FROM course WHERE path = ? AND course_group = ? AND semester = ?",
        )
        .bind(path)
        .bind(i64::from(group))
        .bind(semester)
        .fetch_optional(&self.pool)
        .await?
        .map(Course::try_from)
        .transpose()
    }

    /// Inserts the course unless its `(path, group, semester)` already exists
    /// and returns whichever row holds that key afterwards.
    pub async fn insert_course(&self, course: &NewCourse) -> Result<Course> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO course (path, course_group, semester, name, course_type)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (path, course_group, semester) DO NOTHING",
        )
        .bind(&course.path)
        .bind(i64::from(course.group))
        .bind(&course.semester)
        .bind(&course.name)
        .bind(&course.course_type)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT * FROM course WHERE path = ? AND course_group = ? AND semester = ?",
        )
        .bind(&course.path)
        .bind(i64::from(course.group))
        .bind(&course.semester)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    /// The feed published at `path`, if any.
    pub async fn find_feed_by_path(&self, path: &str) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>("SELECT id, path FROM feed WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Feed::from))
    }

    /// Looks the feed up by its canonical key, then confirms the stored
    /// association matches the set exactly.
    pub async fn find_feed_by_course_set(&self, set: &CourseSet) -> Result<Option<Feed>> {
        let Some(row) =
            sqlx::query_as::<_, FeedRow>("SELECT id, path FROM feed WHERE course_set = ?")
                .bind(set.canonical_key())
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let stored = self.feed_course_set(row.id).await?;
        if stored != *set {
            return Err(Error::Internal(format!(
                "feed {} is indexed as [{}] but holds [{}]",
                row.path,
                set.canonical_key(),
                stored.canonical_key()
            )));
        }
        Ok(Some(row.into()))
    }

    async fn feed_course_set(&self, feed_id: i64) -> Result<CourseSet> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT course_id FROM feed_course WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(CourseSet::from_ids(ids))
    }

    /// Courses of a feed in the order they were given at creation.
    pub async fn feed_courses(&self, feed_id: i64) -> Result<Vec<Course>> {
        sqlx::query_as::<_, CourseRow>(
            "SELECT c.* FROM course c
             JOIN feed_course fc ON fc.course_id = c.id
             WHERE fc.feed_id = ?
             ORDER BY fc.position",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Course::try_from)
        .collect()
    }

    /// Creates a feed over `courses` in one transaction unless a feed with
    /// the same course set exists. `courses` must be free of duplicates.
    pub async fn insert_feed(&self, path: &str, courses: &[Course]) -> Result<FeedInsert> {
        let set = CourseSet::from_courses(courses);
        if set.is_empty() {
            return Err(Error::Validation("No courses provided".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO feed (path, course_set) VALUES (?, ?)
             ON CONFLICT (course_set) DO NOTHING
             RETURNING id",
        )
        .bind(path)
        .bind(set.canonical_key())
        .fetch_optional(&mut *tx)
        .await;

        let feed_id = match inserted {
            Ok(Some(id)) => id,
            Ok(None) => {
                tx.rollback().await?;
                return match self.find_feed_by_course_set(&set).await? {
                    Some(feed) => Ok(FeedInsert::Existing(feed)),
                    None => Err(Error::Internal(format!(
                        "feed for [{}] vanished after conflict",
                        set.canonical_key()
                    ))),
                };
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await?;
                return Ok(FeedInsert::PathTaken);
            }
            Err(e) => return Err(e.into()),
        };

        for (position, course) in courses.iter().enumerate() {
            sqlx::query("INSERT INTO feed_course (feed_id, course_id, position) VALUES (?, ?, ?)")
                .bind(feed_id)
                .bind(course.id)
                .bind(i64::try_from(position).unwrap_or(i64::MAX))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(FeedInsert::Created(Feed {
            id: feed_id,
            path: path.to_string(),
        }))
    }
}

#[async_trait]
impl PathLookup for FeedStore {
    async fn path_taken(&self, path: &str) -> Result<bool> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM feed WHERE path = ?)")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        Ok(taken)
    }
}
