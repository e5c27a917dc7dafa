use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::build::{Build, BuildCreationData, BuildFilter, BuildGateway, BuildState};
use crate::error::{ItemFailure, PrebuildError, Result};
use crate::gitprovider::GitRepository;

// Fixed-width timestamps keep lexical and chronological order identical
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PrebuildError::Database(format!("Invalid timestamp '{}': {}", value, e)))
}

// Helper struct to map DB row to Build struct
#[derive(FromRow)]
struct BuildRow {
    id: String,
    prebuild_id: String,
    repository_url: String,
    repository_owner: String,
    repository_name: String,
    branch: String,
    sha: String,
    state: String,
    image: String,
    user: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<BuildRow> for Build {
    type Error = PrebuildError;

    fn try_from(row: BuildRow) -> Result<Self> {
        Ok(Build {
            state: row.state.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            id: row.id,
            prebuild_id: row.prebuild_id,
            repository: GitRepository {
                url: row.repository_url,
                owner: row.repository_owner,
                name: row.repository_name,
                branch: row.branch,
                sha: row.sha,
            },
            image: row.image,
            user: row.user,
        })
    }
}

/// Persistent build records using SQLite
#[derive(Clone)]
pub struct SqlBuildStore {
    pool: SqlitePool,
}

impl SqlBuildStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a state transition reported by the build executor
    pub async fn set_state(&self, id: &str, state: BuildState) -> Result<()> {
        let result = sqlx::query("UPDATE builds SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(timestamp(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| PrebuildError::Database(format!("Failed to update build state: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(PrebuildError::NotFound(format!("build '{}'", id)));
        }
        Ok(())
    }

    fn filtered_query(filter: &BuildFilter) -> QueryBuilder<'static, Sqlite> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT
                id, prebuild_id, repository_url, repository_owner, repository_name,
                branch, sha, state, image, user, created_at, updated_at
            FROM builds
            WHERE 1 = 1"#,
        );

        if let Some(id) = &filter.id {
            query.push(" AND id = ").push_bind(id.clone());
        }
        if let Some(ids) = &filter.prebuild_ids {
            if ids.is_empty() {
                query.push(" AND 0 = 1");
            } else {
                query.push(" AND prebuild_id IN (");
                let mut list = query.separated(", ");
                for id in ids {
                    list.push_bind(id.clone());
                }
                list.push_unseparated(")");
            }
        }
        if let Some(states) = &filter.states {
            if states.is_empty() {
                query.push(" AND 0 = 1");
            } else {
                query.push(" AND state IN (");
                let mut list = query.separated(", ");
                for state in states {
                    list.push_bind(state.as_str());
                }
                list.push_unseparated(")");
            }
        }

        if filter.wants_newest() {
            query.push(" ORDER BY created_at DESC, id DESC LIMIT 1");
        } else {
            query.push(" ORDER BY created_at ASC, id ASC");
        }
        query
    }

    async fn mark_one(&self, build: &Build, force: bool) -> Result<()> {
        if build.state == BuildState::Running && !force {
            return Err(PrebuildError::Conflict(format!(
                "build '{}' is still running",
                build.id
            )));
        }
        self.set_state(&build.id, BuildState::Deleting).await
    }
}

#[async_trait]
impl BuildGateway for SqlBuildStore {
    async fn create(&self, data: BuildCreationData) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO builds (
                id, prebuild_id, repository_url, repository_owner, repository_name,
                branch, sha, state, image, user, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&data.prebuild_id)
        .bind(&data.repository.url)
        .bind(&data.repository.owner)
        .bind(&data.repository.name)
        .bind(&data.repository.branch)
        .bind(&data.repository.sha)
        .bind(BuildState::Pending.as_str())
        .bind(&data.image)
        .bind(&data.user)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to create build: {}", e)))?;

        info!(build_id = %id, prebuild_id = %data.prebuild_id, "Created build");
        Ok(id)
    }

    async fn find(&self, filter: &BuildFilter) -> Result<Option<Build>> {
        let row = Self::filtered_query(filter)
            .build_query_as::<BuildRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PrebuildError::Database(format!("Failed to fetch build: {}", e)))?;

        row.map(Build::try_from).transpose()
    }

    async fn list(&self, filter: &BuildFilter) -> Result<Vec<Build>> {
        let rows = Self::filtered_query(filter)
            .build_query_as::<BuildRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PrebuildError::Database(format!("Failed to fetch builds: {}", e)))?;

        rows.into_iter().map(Build::try_from).collect()
    }

    async fn mark_for_deletion(&self, filter: &BuildFilter, force: bool) -> Vec<ItemFailure> {
        let builds = match self.list(filter).await {
            Ok(builds) => builds,
            Err(e) => {
                let item = filter.id.clone().unwrap_or_else(|| "builds".to_string());
                return vec![ItemFailure::new(item, e)];
            }
        };

        let mut failures = Vec::new();
        for build in builds {
            if matches!(build.state, BuildState::Deleting | BuildState::Deleted) {
                debug!(build_id = %build.id, "Build already marked for deletion");
                continue;
            }
            match self.mark_one(&build, force).await {
                Ok(()) => info!(build_id = %build.id, force, "Marked build for deletion"),
                Err(e) => failures.push(ItemFailure::new(build.id.clone(), e)),
            }
        }
        failures
    }
}
