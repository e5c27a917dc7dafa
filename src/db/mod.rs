use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

pub mod builds;
pub mod store;

use crate::error::{PrebuildError, Result};
use crate::prebuild::PrebuildConfig;
use crate::template::{WorkspaceTemplate, WorkspaceTemplateFilter};
pub use builds::SqlBuildStore;
pub use store::SqlPrebuildStore;

/// Initialize the SQLite database connection pool and run migrations
pub async fn init_db(db_path: impl AsRef<Path>) -> Result<SqlitePool> {
    let db_path = db_path.as_ref();
    let db_path_str = db_path.to_string_lossy();

    // Ensure the database file exists or create it
    if !db_path.exists() {
        info!("Database file not found at {}, creating...", db_path_str);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PrebuildError::Database(format!("Failed to create database directory: {}", e))
            })?;
        }
        std::fs::File::create(db_path).map_err(|e| {
            PrebuildError::Database(format!("Failed to create database file: {}", e))
        })?;
    }

    let db_url = format!("sqlite:{}", db_path_str);
    info!("Connecting to database at {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to connect to database: {}", e)))?;

    run_migrations(&pool).await?;
    info!("Database initialized successfully");
    Ok(pool)
}

/// Single-connection in-memory database, used by tests
pub async fn init_memory_db() -> Result<SqlitePool> {
    // every connection to :memory: is a separate database, so pin the pool to one
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to open in-memory database: {}", e)))?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| PrebuildError::Database(format!("Failed to run migrations: {}", e)))
}

/// Persistence for workspace templates and the prebuild configs they own
#[async_trait]
pub trait PrebuildStore: Send + Sync {
    async fn save_template(&self, template: &WorkspaceTemplate) -> Result<()>;

    async fn find_templates(&self, filter: &WorkspaceTemplateFilter)
    -> Result<Vec<WorkspaceTemplate>>;

    /// Insert or replace the config keyed by `(workspace_template_name, id)`.
    async fn save_prebuild(&self, prebuild: &PrebuildConfig) -> Result<()>;

    async fn find_prebuild(&self, template_name: &str, id: &str) -> Result<Option<PrebuildConfig>>;

    /// Configs of one template, or of every template when `None`; ordered by template then id.
    async fn list_prebuilds(&self, template_name: Option<&str>) -> Result<Vec<PrebuildConfig>>;

    /// Returns false when nothing was deleted.
    async fn delete_prebuild(&self, template_name: &str, id: &str) -> Result<bool>;
}
