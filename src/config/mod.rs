use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the render queue
    pub redis_url: String,

    /// Bucket holding source assets and rendered outputs
    pub s3_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    #[serde(default = "default_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Bind address of the worker's /health and /metrics server
    #[serde(default = "default_ops_addr")]
    pub ops_addr: String,

    /// Number of concurrent claim-execute loops per worker process
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: usize,

    /// Wall-clock budget for one render job
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Sleep between polls of an empty queue
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Period of the stale job sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_ops_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_concurrency() -> usize {
    2
}

fn default_job_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
