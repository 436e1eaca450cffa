use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{CatalogStore, JobStore, StoreError};
use crate::models::job::{RenderJob, RenderStatus, TransitionError};
use crate::models::style::{SizePreset, Style};

const JOB_COLUMNS: &str = "id, asset_ref, style_id, size_preset_id, status, algorithm_version, \
     algorithm_config, created_at, started_at, completed_at, duration_ms, error, output_ref, preview_ref";

/// PostgreSQL-backed job store and style catalog.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new queued render job
    pub async fn create_job(&self, job: &RenderJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO render_jobs (id, asset_ref, style_id, size_preset_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id)
        .bind(&job.asset_ref)
        .bind(job.style_ref)
        .bind(job.size_preset_ref)
        .bind(job.status.to_string())
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<RenderJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM render_jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }
}

fn job_from_row(r: &PgRow) -> Result<RenderJob, StoreError> {
    let status_str: String = r.try_get("status")?;
    let status = status_str
        .parse::<RenderStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown status {:?}", status_str)))?;

    Ok(RenderJob {
        id: r.try_get("id")?,
        asset_ref: r.try_get("asset_ref")?,
        style_ref: r.try_get("style_id")?,
        size_preset_ref: r.try_get("size_preset_id")?,
        status,
        algorithm_version: r.try_get("algorithm_version")?,
        algorithm_config: r.try_get("algorithm_config")?,
        created_at: r.try_get("created_at")?,
        started_at: r.try_get("started_at")?,
        completed_at: r.try_get("completed_at")?,
        duration_ms: r.try_get("duration_ms")?,
        error: r.try_get("error")?,
        output_ref: r.try_get("output_ref")?,
        preview_ref: r.try_get("preview_ref")?,
    })
}

#[async_trait]
impl JobStore for PgStore {
    async fn load(&self, id: Uuid) -> Result<RenderJob, StoreError> {
        self.find_job(id).await?.ok_or(StoreError::JobNotFound(id))
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<RenderJob>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE render_jobs
            SET status = 'started', started_at = $2
            WHERE id = $1 AND status = 'queued'
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn save(&self, job: &RenderJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE render_jobs
            SET status = $2,
                algorithm_version = $3,
                algorithm_config = $4,
                started_at = $5,
                completed_at = $6,
                duration_ms = $7,
                error = $8,
                output_ref = $9,
                preview_ref = $10
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(&job.algorithm_version)
        .bind(&job.algorithm_config)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.duration_ms)
        .bind(&job.error)
        .bind(&job.output_ref)
        .bind(&job.preview_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn requeue(&self, id: Uuid) -> Result<RenderJob, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE render_jobs
            SET status = 'queued',
                started_at = NULL,
                completed_at = NULL,
                duration_ms = NULL,
                error = NULL,
                output_ref = NULL,
                preview_ref = NULL
            WHERE id = $1 AND status = 'failed'
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => job_from_row(&r),
            None => {
                let job = self.load(id).await?;
                Err(StoreError::Transition(TransitionError {
                    from: job.status,
                    to: RenderStatus::Queued,
                }))
            }
        }
    }

    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<RenderJob>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE render_jobs
            SET status = 'failed',
                completed_at = GREATEST($2, started_at),
                duration_ms = (EXTRACT(EPOCH FROM (GREATEST($2, started_at) - started_at)) * 1000)::BIGINT,
                error = $3
            WHERE status = 'started' AND started_at < $1
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(cutoff)
        .bind(now)
        .bind(error)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_style(&self, id: Uuid) -> Result<Style, StoreError> {
        sqlx::query_as::<_, Style>(
            r#"
            SELECT id, name, slug, algorithm_config, algorithm_version
            FROM styles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::StyleNotFound(id))
    }

    async fn get_size_preset(&self, id: Uuid) -> Result<SizePreset, StoreError> {
        sqlx::query_as::<_, SizePreset>(
            r#"
            SELECT id, name, width, height, resolution
            FROM size_presets
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::SizePresetNotFound(id))
    }
}
