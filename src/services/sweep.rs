//! Recovery of claims abandoned by a dead worker or a failed final save.
//!
//! A job left `started` past its budget is failed with a timeout error.
//! Processing-list entries are then reconciled against the job rows: entries
//! of terminal or deleted jobs are dropped, entries of jobs that were never
//! claimed go back on the pending list, and entries of running jobs stay.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::job::RenderStatus;
use crate::services::executor::ExecuteError;
use crate::services::queue::JobHandle;

/// Slack past the job budget before a `started` job counts as abandoned.
pub const STALE_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs failed for outliving their budget.
    pub failed: Vec<Uuid>,
    /// Processing entries dropped because their job is finished or gone.
    pub released: usize,
    /// Processing entries of never-claimed jobs put back on the queue.
    pub requeued: usize,
}

/// Fail stale `started` jobs and reconcile the processing list as of `now`.
pub async fn sweep_stale_jobs(state: &AppState, now: DateTime<Utc>) -> Result<SweepReport, ExecuteError> {
    let mut report = SweepReport::default();
    let budget = state.job_timeout;

    let cutoff = budget
        .checked_add(STALE_GRACE)
        .and_then(|stale_after| chrono::Duration::from_std(stale_after).ok())
        .and_then(|stale_after| now.checked_sub_signed(stale_after));
    if let Some(cutoff) = cutoff {
        let timeout = ExecuteError::Timeout(budget);
        let error = format!(
            "{}: {} and its worker never recorded an outcome",
            timeout.kind(),
            timeout
        );
        for job in state.jobs.fail_stale(cutoff, now, &error).await? {
            metrics::counter!("render_jobs_failed_total", "kind" => "timeout_error").increment(1);
            tracing::warn!(
                job_id = %job.id,
                started_at = ?job.started_at,
                "Failed render job abandoned past its budget"
            );
            report.failed.push(job.id);
        }
    }

    for handle in state.queue.in_flight().await? {
        match state.jobs.load(handle.job_id).await {
            Ok(job) if job.is_terminal() => {
                drop_entry(state, &handle).await?;
                report.released += 1;
            }
            Ok(job) if job.status == RenderStatus::Queued => {
                state.queue.enqueue(job.id).await?;
                drop_entry(state, &handle).await?;
                tracing::info!(job_id = %job.id, "Returned unclaimed render job to the queue");
                report.requeued += 1;
            }
            Ok(_) => {}
            Err(StoreError::JobNotFound(_)) => {
                drop_entry(state, &handle).await?;
                report.released += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if report != SweepReport::default() {
        tracing::info!(
            failed = report.failed.len(),
            released = report.released,
            requeued = report.requeued,
            "Stale job sweep finished"
        );
    }
    Ok(report)
}

async fn drop_entry(state: &AppState, handle: &JobHandle) -> Result<(), ExecuteError> {
    state.queue.release(handle).await?;
    tracing::debug!(job_id = %handle.job_id, "Dropped orphaned processing entry");
    Ok(())
}
