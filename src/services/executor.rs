//! Claim, render and finalize a single render job.

use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::job::{RenderJob, TransitionError};
use crate::pipelines::PipelineError;
use crate::services::output::{self, OutputError, RenderedOutputs};
use crate::services::queue::{JobHandle, QueueError};
use crate::services::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("Render job {0} is not queued")]
    NotClaimable(Uuid),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Render exceeded its {}s budget", .0.as_secs())]
    Timeout(Duration),

    #[error("Render task aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ExecuteError {
    /// Failure label recorded on jobs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecuteError::Pipeline(e) | ExecuteError::Output(OutputError::Pipeline(e)) => e.kind(),
            ExecuteError::Output(_) | ExecuteError::Aborted(_) => "processing_error",
            ExecuteError::Timeout(_) => "timeout_error",
            ExecuteError::NotClaimable(_)
            | ExecuteError::Transition(_)
            | ExecuteError::Store(_)
            | ExecuteError::Storage(_)
            | ExecuteError::Queue(_) => "infrastructure_error",
        }
    }
}

/// Run the job behind `handle` to a terminal state.
///
/// A job that fails in the pipeline, during I/O, or by running out of time
/// is persisted as `failed`. Failures come back as `Ok` with that job,
/// except a timeout which is returned as `Err(Timeout)` after the job is
/// saved, since the render thread may still be running and the caller has
/// to recycle the process. `Err` is otherwise reserved for claim and store
/// failures, where no terminal state could be recorded.
pub async fn execute_job(state: &AppState, handle: &JobHandle) -> Result<RenderJob, ExecuteError> {
    let Some(mut job) = state.jobs.claim(handle.job_id, Utc::now()).await? else {
        tracing::warn!(job_id = %handle.job_id, "Render job could not be claimed, dropping queue entry");
        release(state, handle).await;
        return Err(ExecuteError::NotClaimable(handle.job_id));
    };

    metrics::counter!("render_jobs_started_total").increment(1);
    tracing::info!(job_id = %job.id, asset_ref = %job.asset_ref, "Render job started");
    let started = Instant::now();

    let outcome = match tokio::time::timeout(state.job_timeout, run(state, &mut job)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ExecuteError::Timeout(state.job_timeout)),
    };

    match outcome {
        Ok((output_ref, preview_ref)) => {
            job.complete(Utc::now(), output_ref, preview_ref)?;
            state.jobs.save(&job).await?;
            release(state, handle).await;

            metrics::counter!("render_jobs_completed_total").increment(1);
            tracing::info!(
                job_id = %job.id,
                algorithm_version = job.algorithm_version.as_deref().unwrap_or_default(),
                duration_ms = job.duration_ms.unwrap_or_default(),
                "Render job completed"
            );
            Ok(job)
        }
        Err(e) => {
            let kind = e.kind();
            job.fail(Utc::now(), format!("{}: {}", kind, e))?;
            state.jobs.save(&job).await?;
            release(state, handle).await;

            metrics::counter!("render_jobs_failed_total", "kind" => kind).increment(1);
            tracing::error!(
                job_id = %job.id,
                kind,
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Render job failed"
            );

            match e {
                ExecuteError::Timeout(_) => Err(e),
                _ => Ok(job),
            }
        }
    }
}

/// Resolve, download, render and upload. Returns the output and preview refs.
async fn run(state: &AppState, job: &mut RenderJob) -> Result<(String, String), ExecuteError> {
    let style = state.catalog.get_style(job.style_ref).await?;
    let preset = state.catalog.get_size_preset(job.size_preset_ref).await?;
    let target = preset.pixel_dimensions()?;

    // A requeued job reruns at the version and parameters it was first stamped with
    let instance = match (&job.algorithm_version, &job.algorithm_config) {
        (Some(version), Some(config)) => state.registry.resolve(&style.slug, version, config)?,
        _ => state
            .registry
            .resolve(&style.slug, &style.algorithm_version, &style.algorithm_config)?,
    };
    job.record_algorithm(instance.identity().version, instance.resolved_config()?)?;
    state.jobs.save(job).await?;

    tracing::info!(
        job_id = %job.id,
        style = %style.slug,
        algorithm_version = instance.identity().version,
        width = target.0,
        height = target.1,
        "Resolved render pipeline"
    );

    let source = state.objects.download(&job.asset_ref).await?;

    let render_start = Instant::now();
    let rendered: RenderedOutputs =
        tokio::task::spawn_blocking(move || output::render_outputs(&instance, &source, target))
            .await
            .map_err(|e| ExecuteError::Aborted(e.to_string()))??;
    metrics::histogram!("render_duration_seconds", "style" => style.slug.clone())
        .record(render_start.elapsed().as_secs_f64());

    let output_ref = state
        .objects
        .upload(&output::print_key(job.id), rendered.print, output::PRINT_CONTENT_TYPE)
        .await?;
    let preview_ref = state
        .objects
        .upload(&output::preview_key(job.id), rendered.preview, output::PREVIEW_CONTENT_TYPE)
        .await?;

    Ok((output_ref, preview_ref))
}

async fn release(state: &AppState, handle: &JobHandle) {
    if let Err(e) = state.queue.release(handle).await {
        tracing::warn!(job_id = %handle.job_id, error = %e, "Failed to release queue entry");
    }
}

/// Administrative reset of a failed job, followed by re-enqueueing it.
pub async fn requeue_job(state: &AppState, job_id: Uuid) -> Result<RenderJob, ExecuteError> {
    let job = state.jobs.requeue(job_id).await?;
    state.queue.enqueue(job_id).await?;
    tracing::info!(job_id = %job_id, "Render job requeued");
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let invalid = ExecuteError::Pipeline(PipelineError::InvalidConfiguration("x".into()));
        assert_eq!(invalid.kind(), "invalid_configuration");

        let nested = ExecuteError::Output(OutputError::Pipeline(PipelineError::Processing("x".into())));
        assert_eq!(nested.kind(), "processing_error");

        assert_eq!(
            ExecuteError::Output(OutputError::Decode("bad".into())).kind(),
            "processing_error"
        );
        assert_eq!(ExecuteError::Timeout(Duration::from_secs(600)).kind(), "timeout_error");
        assert_eq!(
            ExecuteError::Storage(StorageError::NotFound("k".into())).kind(),
            "infrastructure_error"
        );
    }

    #[test]
    fn test_timeout_message() {
        let e = ExecuteError::Timeout(Duration::from_secs(600));
        assert_eq!(e.to_string(), "Render exceeded its 600s budget");
    }
}
