use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use super::PrebuildStore;
use crate::error::{PrebuildError, Result};
use crate::prebuild::PrebuildConfig;
use crate::template::{WorkspaceTemplate, WorkspaceTemplateFilter};

// Helper struct to map DB row to WorkspaceTemplate
#[derive(FromRow)]
struct TemplateRow {
    name: String,
    repository_url: String,
    image: String,
    user: String,
    build_config: Option<String>,
}

impl From<TemplateRow> for WorkspaceTemplate {
    fn from(row: TemplateRow) -> Self {
        WorkspaceTemplate {
            name: row.name,
            repository_url: row.repository_url,
            image: row.image,
            user: row.user,
            build_config: row.build_config,
        }
    }
}

// Helper struct to map DB row to PrebuildConfig
#[derive(FromRow)]
struct PrebuildRow {
    workspace_template_name: String,
    id: String,
    branch: String,
    commit_interval: Option<i64>,
    retention: i64,
    trigger_files: String,
    repository_url: String,
    webhook_id: Option<String>,
}

impl TryFrom<PrebuildRow> for PrebuildConfig {
    type Error = PrebuildError;

    fn try_from(row: PrebuildRow) -> Result<Self> {
        let corrupt = |field: &str| {
            PrebuildError::Database(format!(
                "Prebuild {}/{} has an invalid {}",
                row.workspace_template_name, row.id, field
            ))
        };

        let commit_interval = row
            .commit_interval
            .map(|n| u32::try_from(n).map_err(|_| corrupt("commit_interval")))
            .transpose()?;
        let retention = u32::try_from(row.retention).map_err(|_| corrupt("retention"))?;
        let trigger_files: Vec<String> =
            serde_json::from_str(&row.trigger_files).map_err(|_| corrupt("trigger_files"))?;

        Ok(PrebuildConfig {
            id: row.id,
            workspace_template_name: row.workspace_template_name,
            branch: row.branch,
            commit_interval,
            retention,
            trigger_files,
            repository_url: row.repository_url,
            webhook_id: row.webhook_id,
        })
    }
}

/// Persistent storage for templates and prebuild configs using SQLite
#[derive(Clone)]
pub struct SqlPrebuildStore {
    pool: SqlitePool,
}

impl SqlPrebuildStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const PREBUILD_COLUMNS: &str = "workspace_template_name, id, branch, commit_interval, retention, trigger_files, repository_url, webhook_id";

#[async_trait]
impl PrebuildStore for SqlPrebuildStore {
    async fn save_template(&self, template: &WorkspaceTemplate) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO workspace_templates (
                name, repository_url, image, user, build_config, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                repository_url = excluded.repository_url,
                image = excluded.image,
                user = excluded.user,
                build_config = excluded.build_config,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&template.name)
        .bind(&template.repository_url)
        .bind(&template.image)
        .bind(&template.user)
        .bind(&template.build_config)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to save template: {}", e)))?;

        Ok(())
    }

    async fn find_templates(
        &self,
        filter: &WorkspaceTemplateFilter,
    ) -> Result<Vec<WorkspaceTemplate>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT name, repository_url, image, user, build_config FROM workspace_templates WHERE 1 = 1",
        );
        if let Some(name) = &filter.name {
            query.push(" AND name = ").push_bind(name.clone());
        }
        if let Some(url) = &filter.repository_url {
            query.push(" AND repository_url = ").push_bind(url.clone());
        }
        query.push(" ORDER BY name ASC");

        let rows = query
            .build_query_as::<TemplateRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PrebuildError::Database(format!("Failed to fetch templates: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn save_prebuild(&self, prebuild: &PrebuildConfig) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let trigger_files = serde_json::to_string(&prebuild.trigger_files)
            .map_err(|e| PrebuildError::Database(format!("Failed to encode trigger files: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO prebuild_configs (
                workspace_template_name, id, branch, commit_interval,
                retention, trigger_files, repository_url, webhook_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(workspace_template_name, id) DO UPDATE SET
                branch = excluded.branch,
                commit_interval = excluded.commit_interval,
                retention = excluded.retention,
                trigger_files = excluded.trigger_files,
                repository_url = excluded.repository_url,
                webhook_id = excluded.webhook_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&prebuild.workspace_template_name)
        .bind(&prebuild.id)
        .bind(&prebuild.branch)
        .bind(prebuild.commit_interval.map(i64::from))
        .bind(i64::from(prebuild.retention))
        .bind(trigger_files)
        .bind(&prebuild.repository_url)
        .bind(&prebuild.webhook_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to save prebuild: {}", e)))?;

        Ok(())
    }

    async fn find_prebuild(&self, template_name: &str, id: &str) -> Result<Option<PrebuildConfig>> {
        let row = sqlx::query_as::<_, PrebuildRow>(&format!(
            "SELECT {} FROM prebuild_configs WHERE workspace_template_name = ? AND id = ?",
            PREBUILD_COLUMNS
        ))
        .bind(template_name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to fetch prebuild: {}", e)))?;

        row.map(PrebuildConfig::try_from).transpose()
    }

    async fn list_prebuilds(&self, template_name: Option<&str>) -> Result<Vec<PrebuildConfig>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM prebuild_configs",
            PREBUILD_COLUMNS
        ));
        if let Some(name) = template_name {
            query.push(" WHERE workspace_template_name = ").push_bind(name.to_string());
        }
        query.push(" ORDER BY workspace_template_name ASC, id ASC");

        let rows = query
            .build_query_as::<PrebuildRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PrebuildError::Database(format!("Failed to fetch prebuilds: {}", e)))?;

        rows.into_iter().map(PrebuildConfig::try_from).collect()
    }

    async fn delete_prebuild(&self, template_name: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM prebuild_configs WHERE workspace_template_name = ? AND id = ?",
        )
        .bind(template_name)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to delete prebuild: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}
