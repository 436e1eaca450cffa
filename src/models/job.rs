use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle of a render job.
///
/// `Queued -> Started -> Completed | Failed`. The only backward move is the
/// administrative requeue of a failed job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RenderStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal render job transition from {from} to {to}")]
pub struct TransitionError {
    pub from: RenderStatus,
    pub to: RenderStatus,
}

/// A render of one source asset in one style at one size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderJob {
    pub id: Uuid,
    pub asset_ref: String,
    pub style_ref: Uuid,
    pub size_preset_ref: Uuid,
    pub status: RenderStatus,
    pub algorithm_version: Option<String>,
    /// Fully resolved parameters the recorded version ran with.
    pub algorithm_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub output_ref: Option<String>,
    pub preview_ref: Option<String>,
}

impl RenderJob {
    pub fn new(asset_ref: impl Into<String>, style_ref: Uuid, size_preset_ref: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_ref: asset_ref.into(),
            style_ref,
            size_preset_ref,
            status: RenderStatus::Queued,
            algorithm_version: None,
            algorithm_config: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
            output_ref: None,
            preview_ref: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RenderStatus::Completed | RenderStatus::Failed)
    }

    fn expect_status(&self, expected: RenderStatus, to: RenderStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError { from: self.status, to })
        }
    }

    /// Claim for execution.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_status(RenderStatus::Queued, RenderStatus::Started)?;
        self.status = RenderStatus::Started;
        self.started_at = Some(now);
        Ok(())
    }

    /// Stamp the algorithm version and resolved parameters this execution
    /// runs under. Once recorded they are never replaced.
    pub fn record_algorithm(&mut self, version: &str, config: serde_json::Value) -> Result<(), TransitionError> {
        self.expect_status(RenderStatus::Started, RenderStatus::Started)?;
        if self.algorithm_version.is_none() {
            self.algorithm_version = Some(version.to_string());
            self.algorithm_config = Some(config);
        }
        Ok(())
    }

    pub fn complete(
        &mut self,
        now: DateTime<Utc>,
        output_ref: impl Into<String>,
        preview_ref: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.expect_status(RenderStatus::Started, RenderStatus::Completed)?;
        self.finish(now);
        self.status = RenderStatus::Completed;
        self.output_ref = Some(output_ref.into());
        self.preview_ref = Some(preview_ref.into());
        Ok(())
    }

    pub fn fail(&mut self, now: DateTime<Utc>, error: impl Into<String>) -> Result<(), TransitionError> {
        self.expect_status(RenderStatus::Started, RenderStatus::Failed)?;
        self.finish(now);
        self.status = RenderStatus::Failed;
        self.error = Some(error.into());
        Ok(())
    }

    /// Administrative reset of a failed job back to the queue. A recorded
    /// algorithm version and snapshot survive, so the rerun uses them.
    pub fn requeue(&mut self) -> Result<(), TransitionError> {
        self.expect_status(RenderStatus::Failed, RenderStatus::Queued)?;
        self.status = RenderStatus::Queued;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
        self.error = None;
        self.output_ref = None;
        self.preview_ref = None;
        Ok(())
    }

    // completed_at never precedes started_at, so duration is never negative.
    fn finish(&mut self, now: DateTime<Utc>) {
        let started = self.started_at.unwrap_or(now);
        let completed = now.max(started);
        self.completed_at = Some(completed);
        self.duration_ms = Some((completed - started).num_milliseconds());
    }
}
