use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{RenderJob, TransitionError};
use crate::models::style::{SizePreset, Style};

pub mod queries;

pub use queries::PgStore;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Persistent render job records.
///
/// Only the worker holding a job's claim may `save` it; `claim` is the
/// atomic step that hands out that right.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<RenderJob, StoreError>;

    /// Move a queued job to `started`. Returns `None` when the job is not
    /// queued, i.e. another worker already holds it or it already finished.
    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<RenderJob>, StoreError>;

    async fn save(&self, job: &RenderJob) -> Result<(), StoreError>;

    /// Administrative reset of a failed job.
    async fn requeue(&self, id: Uuid) -> Result<RenderJob, StoreError>;

    /// Fail every job still `started` from before `cutoff`, recording `error`.
    /// Returns the jobs that were failed.
    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<RenderJob>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Read access to styles and size presets.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_style(&self, id: Uuid) -> Result<Style, StoreError>;

    async fn get_size_preset(&self, id: Uuid) -> Result<SizePreset, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Render job {0} not found")]
    JobNotFound(Uuid),

    #[error("Style {0} not found")]
    StyleNotFound(Uuid),

    #[error("Size preset {0} not found")]
    SizePresetNotFound(Uuid),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Corrupt render job row: {0}")]
    Corrupt(String),
}
