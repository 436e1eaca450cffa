use metrics_exporter_prometheus::PrometheusBuilder;
use pop_render::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgStore},
    routes,
    services::{
        executor::{self, ExecuteError},
        queue::RedisQueue,
        storage::S3Store,
        sweep,
    },
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

/// Exit status asking the supervisor to restart the process (EX_TEMPFAIL).
const EXIT_RECYCLE: i32 = 75;

/// Outcome of one pass of a worker loop.
enum Tick {
    Idle,
    Processed,
    Recycle,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting render worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_render_metrics();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
    let objects = S3Store::new(
        &config.s3_bucket,
        &config.s3_region,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object store");

    let queue = RedisQueue::new(&config.redis_url).expect("Failed to initialize render queue");

    let state = AppState::new(PgStore::new(db_pool), objects, queue, config.job_timeout());

    let listener = tokio::net::TcpListener::bind(&config.ops_addr)
        .await
        .expect("Failed to bind ops address");
    tracing::info!("Ops server listening on {}", config.ops_addr);
    let ops = routes::ops_router(state.clone(), prometheus_handle);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, ops).await {
            tracing::error!(error = %e, "Ops server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loops = JoinSet::new();
    for worker in 0..config.worker_concurrency.max(1) {
        loops.spawn(run_loop(
            worker,
            state.clone(),
            config.poll_interval(),
            shutdown_rx.clone(),
        ));
    }

    tokio::spawn(run_sweeper(
        state.clone(),
        config.sweep_interval(),
        shutdown_rx.clone(),
    ));

    tracing::info!(
        concurrency = config.worker_concurrency.max(1),
        timeout_secs = config.job_timeout_secs,
        "Worker ready, starting job processing loops"
    );

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown requested, finishing in-flight jobs");
            let _ = shutdown_tx.send(true);
            while let Some(joined) = loops.join_next().await {
                if matches!(joined, Ok(Tick::Recycle)) {
                    recycle();
                }
            }
            tracing::info!("Render worker stopped");
        }
        Some(joined) = loops.join_next() => {
            // A loop only returns early when a render outlived its budget
            match joined {
                Ok(Tick::Recycle) => tracing::warn!("Render timed out, recycling worker process"),
                Ok(_) => tracing::warn!("Worker loop exited unexpectedly, recycling"),
                Err(e) => tracing::error!(error = %e, "Worker loop panicked, recycling"),
            }
            recycle();
        }
    }
}

/// Exit without waiting on blocking render threads, which the runtime
/// would otherwise join on shutdown.
fn recycle() -> ! {
    std::process::exit(EXIT_RECYCLE)
}

async fn run_loop(
    worker: usize,
    state: AppState,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Tick {
    loop {
        if *shutdown.borrow() {
            return Tick::Idle;
        }

        match process_next_job(&state).await {
            Tick::Processed => {
                tracing::debug!(worker, "Job processed, checking for next job");
            }
            Tick::Idle => {
                tracing::trace!(worker, "No jobs available, sleeping");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Tick::Recycle => return Tick::Recycle,
        }
    }
}

/// Periodically fail abandoned jobs and reconcile the processing list.
async fn run_sweeper(state: AppState, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        if let Err(e) = sweep::sweep_stale_jobs(&state, Utc::now()).await {
            tracing::error!(error = %e, "Stale job sweep failed, will retry");
        }
    }
}

/// Claim and execute the next queued job, if any.
async fn process_next_job(state: &AppState) -> Tick {
    let handle = match state.queue.claim_next().await {
        Ok(Some(handle)) => handle,
        Ok(None) => {
            if let Ok(depth) = state.queue.queue_depth().await {
                metrics::gauge!("render_queue_depth").set(depth as f64);
            }
            return Tick::Idle;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to claim from render queue, will retry");
            return Tick::Idle;
        }
    };

    match executor::execute_job(state, &handle).await {
        Ok(_) => Tick::Processed,
        Err(ExecuteError::Timeout(budget)) => {
            tracing::error!(job_id = %handle.job_id, budget_secs = budget.as_secs(), "Render job timed out");
            Tick::Recycle
        }
        Err(ExecuteError::NotClaimable(_)) => Tick::Processed,
        Err(e) => {
            // Left started in the processing list until the stale job sweep fails it
            tracing::error!(job_id = %handle.job_id, error = %e, "Render job could not be finalized");
            Tick::Idle
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
