use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the worker emits.
pub fn describe_render_metrics() {
    metrics::describe_counter!("render_jobs_started_total", "Render jobs claimed by a worker");
    metrics::describe_counter!("render_jobs_completed_total", "Render jobs that completed");
    metrics::describe_counter!(
        "render_jobs_failed_total",
        "Render jobs that failed, labelled by error kind"
    );
    metrics::describe_histogram!(
        "render_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent decoding, rendering and encoding one job"
    );
    metrics::describe_gauge!("render_queue_depth", "Pending jobs in the render queue");
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
