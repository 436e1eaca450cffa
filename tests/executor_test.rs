mod fixtures;
mod helpers;

use helpers::Harness;
use image::ImageFormat;
use pop_render::db::{JobStore, StoreError};
use pop_render::models::job::RenderStatus;
use pop_render::services::executor::{self, ExecuteError};
use pop_render::services::output;
use pop_render::services::queue::RenderQueue;
use pop_render::services::reprint::{self, ReprintError};
use serde_json::json;
use std::time::Duration;

const BUDGET: Duration = Duration::from_secs(60);

fn source() -> Vec<u8> {
    fixtures::png_bytes(&fixtures::photo_like(32, 24))
}

#[tokio::test]
async fn test_execute_job_completes_and_uploads_outputs() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pop-poster", "1.0.0", json!({"clusters": 4}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(source(), &style, &preset).await;
    let handle = h.claim().await;

    let done = executor::execute_job(&h.state, &handle).await.unwrap();

    assert_eq!(done.id, job.id);
    assert_eq!(done.status, RenderStatus::Completed);
    assert_eq!(done.algorithm_version.as_deref(), Some("1.0.0"));
    let config = done.algorithm_config.clone().unwrap();
    assert_eq!(config["clusters"], json!(4));
    assert_eq!(config["seed"], json!(42));
    assert!(done.error.is_none());
    assert!(done.duration_ms.unwrap() >= 0);
    assert!(done.completed_at >= done.started_at);

    let print_ref = done.output_ref.clone().unwrap();
    assert_eq!(print_ref, output::print_key(job.id));
    let print = h.objects.get(&print_ref).unwrap();
    let decoded = image::load_from_memory_with_format(&print, ImageFormat::Tiff).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (40, 32));
    assert!(h.objects.get(done.preview_ref.as_deref().unwrap()).is_some());

    // Persisted state matches the returned job, and the queue entry is gone
    assert_eq!(h.jobs.get(job.id).unwrap(), done);
    assert_eq!(h.queue.processing_len(), 0);
    assert_eq!(h.queue.pending_len(), 0);
}

#[tokio::test]
async fn test_invalid_style_config_fails_job() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pop-poster", "1.0.0", json!({"clusters": 0}));
    let preset = h.add_preset(0.5, 0.4, 80);
    h.submit(source(), &style, &preset).await;
    let handle = h.claim().await;

    let job = executor::execute_job(&h.state, &handle).await.unwrap();

    assert_eq!(job.status, RenderStatus::Failed);
    assert!(job.error.as_deref().unwrap().starts_with("invalid_configuration: "));
    assert!(job.output_ref.is_none());
    assert!(job.algorithm_version.is_none());
    assert_eq!(h.queue.processing_len(), 0);
}

#[tokio::test]
async fn test_unknown_key_fails_job() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pencil-sketch", "1.0.0", json!({"blur_radius": 3}));
    let preset = h.add_preset(0.5, 0.4, 80);
    h.submit(source(), &style, &preset).await;
    let handle = h.claim().await;

    let job = executor::execute_job(&h.state, &handle).await.unwrap();
    assert!(job.error.as_deref().unwrap().contains("blur_radius"));
}

#[tokio::test]
async fn test_registry_misses_fail_job() {
    let h = Harness::new(BUDGET);
    let preset = h.add_preset(0.5, 0.4, 80);

    let watercolor = h.add_style("watercolor", "1.0.0", json!({}));
    h.submit(source(), &watercolor, &preset).await;
    let job = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert!(job.error.as_deref().unwrap().starts_with("unknown_style: "));

    let future = h.add_style("between-the-lines", "2.0.0", json!({}));
    h.submit(source(), &future, &preset).await;
    let job = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert!(job.error.as_deref().unwrap().starts_with("unknown_version: "));
}

#[tokio::test]
async fn test_corrupt_source_is_a_processing_error() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pencil-sketch", "1.0.0", json!({}));
    let preset = h.add_preset(0.5, 0.4, 80);
    h.submit(b"not a png".to_vec(), &style, &preset).await;

    let job = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert_eq!(job.status, RenderStatus::Failed);
    assert!(job.error.as_deref().unwrap().starts_with("processing_error: "));
    // Resolution happened before the download, so the version is stamped
    assert_eq!(job.algorithm_version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_upload_failure_is_an_infrastructure_error() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("between-the-lines", "1.0.0", json!({}));
    let preset = h.add_preset(0.5, 0.4, 80);
    h.submit(source(), &style, &preset).await;
    h.objects.fail_uploads();

    let job = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert_eq!(job.status, RenderStatus::Failed);
    assert!(job.error.as_deref().unwrap().starts_with("infrastructure_error: "));
    assert!(job.output_ref.is_none());
}

#[tokio::test]
async fn test_missing_preset_is_an_infrastructure_error() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pencil-sketch", "1.0.0", json!({}));
    let mut preset = h.add_preset(0.5, 0.4, 80);
    preset.id = uuid::Uuid::new_v4();
    h.submit(source(), &style, &preset).await;

    let job = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert!(job.error.as_deref().unwrap().starts_with("infrastructure_error: "));
}

#[tokio::test]
async fn test_timeout_fails_job_and_asks_for_recycle() {
    let h = Harness::new(Duration::from_millis(50));
    let style = h.add_style("pencil-sketch", "1.0.0", json!({}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(source(), &style, &preset).await;
    h.objects.delay_downloads(Duration::from_secs(30));

    let err = executor::execute_job(&h.state, &h.claim().await).await.unwrap_err();
    assert!(matches!(err, ExecuteError::Timeout(_)));
    assert_eq!(err.kind(), "timeout_error");

    let stored = h.jobs.get(job.id).unwrap();
    assert_eq!(stored.status, RenderStatus::Failed);
    assert!(stored.error.as_deref().unwrap().starts_with("timeout_error: "));
    assert!(stored.duration_ms.unwrap() >= 0);
    assert_eq!(h.queue.processing_len(), 0);
}

#[tokio::test]
async fn test_only_one_worker_claims_a_job() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("between-the-lines", "1.0.0", json!({}));
    let preset = h.add_preset(0.5, 0.4, 80);
    h.submit(source(), &style, &preset).await;
    let handle = h.claim().await;

    let (a, b) = tokio::join!(
        executor::execute_job(&h.state, &handle),
        executor::execute_job(&h.state, &handle)
    );

    let outcomes = [a, b];
    let completed = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(ExecuteError::NotClaimable(_))))
        .count();
    assert_eq!((completed, rejected), (1, 1));
}

#[tokio::test]
async fn test_terminal_job_is_not_rerun() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pencil-sketch", "1.0.0", json!({"blur_sigma": 3.0}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(source(), &style, &preset).await;
    let done = executor::execute_job(&h.state, &h.claim().await).await.unwrap();

    // A duplicate queue entry for a finished job is dropped
    h.queue.enqueue(job.id).await.unwrap();
    let err = executor::execute_job(&h.state, &h.claim().await).await.unwrap_err();
    assert!(matches!(err, ExecuteError::NotClaimable(_)));
    assert_eq!(h.jobs.get(job.id).unwrap(), done);
    assert_eq!(h.queue.processing_len(), 0);
}

#[tokio::test]
async fn test_requeue_resets_failed_job_and_reruns() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pop-poster", "1.0.0", json!({"clusters": 0}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(source(), &style, &preset).await;
    let failed = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert_eq!(failed.status, RenderStatus::Failed);

    let requeued = executor::requeue_job(&h.state, job.id).await.unwrap();
    assert_eq!(requeued.status, RenderStatus::Queued);
    assert!(requeued.error.is_none());
    assert!(requeued.started_at.is_none());
    assert!(requeued.completed_at.is_none());
    assert_eq!(h.queue.pending_len(), 1);

    // Fix the style, then the next run succeeds
    let mut fixed = style.clone();
    fixed.algorithm_config = json!({"clusters": 3});
    h.catalog.put_style(fixed);
    let done = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert_eq!(done.status, RenderStatus::Completed);
    assert_eq!(done.algorithm_config.unwrap()["clusters"], json!(3));
}

#[tokio::test]
async fn test_requeued_job_reruns_at_its_recorded_algorithm() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pop-poster", "1.0.0", json!({"clusters": 4}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(b"truncated upload".to_vec(), &style, &preset).await;
    let failed = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert!(failed.error.as_deref().unwrap().starts_with("processing_error: "));
    let stamped = failed.algorithm_config.clone().unwrap();

    let requeued = executor::requeue_job(&h.state, job.id).await.unwrap();
    assert_eq!(requeued.algorithm_version.as_deref(), Some("1.0.0"));
    assert_eq!(requeued.algorithm_config.as_ref(), Some(&stamped));

    // Re-upload the source and edit the style before the rerun
    h.objects.put(&job.asset_ref, source());
    let mut edited = style.clone();
    edited.algorithm_config = json!({"clusters": 3});
    h.catalog.put_style(edited);

    let done = executor::execute_job(&h.state, &h.claim().await).await.unwrap();
    assert_eq!(done.status, RenderStatus::Completed);
    assert_eq!(done.algorithm_config, Some(stamped));
    assert_eq!(done.algorithm_config.unwrap()["clusters"], json!(4));
}

#[tokio::test]
async fn test_requeue_rejects_non_failed_jobs() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pencil-sketch", "1.0.0", json!({}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(source(), &style, &preset).await;

    let err = h.state.jobs.requeue(job.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Transition(_)));

    let err = executor::requeue_job(&h.state, job.id).await.unwrap_err();
    assert_eq!(err.kind(), "infrastructure_error");
}

#[tokio::test]
async fn test_reprint_matches_after_style_changes() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("between-the-lines", "1.0.0", json!({"gray_levels": 5}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(source(), &style, &preset).await;
    executor::execute_job(&h.state, &h.claim().await).await.unwrap();

    // Later edits to the style must not change historical renders
    let mut edited = style.clone();
    edited.algorithm_config = json!({"gray_levels": 2, "stroke_length": 3});
    h.catalog.put_style(edited);

    let reprint = reprint::reprint_job(&h.state, job.id).await.unwrap();
    assert!(reprint.matches_original);
    assert_eq!((reprint.outputs.width, reprint.outputs.height), (40, 32));
}

#[tokio::test]
async fn test_reprint_requires_completed_job() {
    let h = Harness::new(BUDGET);
    let style = h.add_style("pencil-sketch", "1.0.0", json!({}));
    let preset = h.add_preset(0.5, 0.4, 80);
    let job = h.submit(source(), &style, &preset).await;

    let err = reprint::reprint_job(&h.state, job.id).await.unwrap_err();
    assert!(matches!(
        err,
        ReprintError::NotCompleted {
            status: RenderStatus::Queued,
            ..
        }
    ));
}
