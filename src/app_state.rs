use std::sync::Arc;
use std::time::Duration;

use crate::db::{CatalogStore, JobStore, PgStore};
use crate::pipelines::PipelineRegistry;
use crate::services::{
    queue::{RedisQueue, RenderQueue},
    storage::{ObjectStore, S3Store},
};

/// Collaborators shared by every worker loop and the ops routes.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn RenderQueue>,
    pub registry: PipelineRegistry,
    pub job_timeout: Duration,
}

impl AppState {
    pub fn new(store: PgStore, objects: S3Store, queue: RedisQueue, job_timeout: Duration) -> Self {
        let store = Arc::new(store);
        Self {
            jobs: store.clone(),
            catalog: store,
            objects: Arc::new(objects),
            queue: Arc::new(queue),
            registry: PipelineRegistry::standard(),
            job_timeout,
        }
    }

    pub fn from_parts(
        jobs: Arc<dyn JobStore>,
        catalog: Arc<dyn CatalogStore>,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<dyn RenderQueue>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            catalog,
            objects,
            queue,
            registry: PipelineRegistry::standard(),
            job_timeout,
        }
    }
}
