//! Re-render a completed job under the algorithm version and parameters it
//! originally ran with.

use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::job::RenderStatus;
use crate::pipelines::PipelineError;
use crate::services::output::{self, OutputError, RenderedOutputs};
use crate::services::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ReprintError {
    #[error("Render job {id} is {status}, only completed jobs can be reprinted")]
    NotCompleted { id: Uuid, status: RenderStatus },

    #[error("Render job {0} has no recorded algorithm version")]
    MissingVersion(Uuid),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Render task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct Reprint {
    pub outputs: RenderedOutputs,
    /// Whether the new print raster equals the stored one byte for byte.
    pub matches_original: bool,
}

pub async fn reprint_job(state: &AppState, job_id: Uuid) -> Result<Reprint, ReprintError> {
    let job = state.jobs.load(job_id).await?;
    if job.status != RenderStatus::Completed {
        return Err(ReprintError::NotCompleted {
            id: job.id,
            status: job.status,
        });
    }
    let version = job
        .algorithm_version
        .clone()
        .ok_or(ReprintError::MissingVersion(job.id))?;

    let style = state.catalog.get_style(job.style_ref).await?;
    let preset = state.catalog.get_size_preset(job.size_preset_ref).await?;
    let target = preset.pixel_dimensions()?;

    // The snapshot is complete, so it pins every parameter regardless of later style edits.
    let overrides = job
        .algorithm_config
        .clone()
        .unwrap_or_else(|| style.algorithm_config.clone());
    let instance = state.registry.resolve(&style.slug, &version, &overrides)?;

    tracing::info!(
        job_id = %job.id,
        style = %style.slug,
        algorithm_version = %version,
        "Reprinting render job"
    );

    let source = state.objects.download(&job.asset_ref).await?;
    let outputs = tokio::task::spawn_blocking(move || output::render_outputs(&instance, &source, target))
        .await
        .map_err(|e| ReprintError::Aborted(e.to_string()))??;

    let matches_original = match &job.output_ref {
        Some(output_ref) => state.objects.download(output_ref).await? == outputs.print,
        None => false,
    };

    Ok(Reprint {
        outputs,
        matches_original,
    })
}
