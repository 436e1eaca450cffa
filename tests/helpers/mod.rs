//! In-memory collaborators for executor tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use pop_render::app_state::AppState;
use pop_render::db::{CatalogStore, JobStore, StoreError};
use pop_render::models::job::{RenderJob, RenderStatus};
use pop_render::models::style::{SizePreset, Style};
use pop_render::services::queue::{JobHandle, QueueError, RenderQueue};
use pop_render::services::storage::{ObjectStore, StorageError};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, RenderJob>>,
    fail_saves: AtomicBool,
}

impl MemoryJobStore {
    pub fn insert(&self, job: RenderJob) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn get(&self, id: Uuid) -> Option<RenderJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, id: Uuid) -> Result<RenderJob, StoreError> {
        self.get(id).ok_or(StoreError::JobNotFound(id))
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<RenderJob>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        if job.status != RenderStatus::Queued {
            return Ok(None);
        }
        job.start(now)?;
        Ok(Some(job.clone()))
    }

    async fn save(&self, job: &RenderJob) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("save rejected".to_string()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(StoreError::JobNotFound(job.id)),
        }
    }

    async fn requeue(&self, id: Uuid) -> Result<RenderJob, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.requeue()?;
        Ok(job.clone())
    }

    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<RenderJob>, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut failed = Vec::new();
        for job in jobs.values_mut() {
            let stale = job.status == RenderStatus::Started && job.started_at.is_some_and(|t| t < cutoff);
            if stale {
                job.fail(now, error)?;
                failed.push(job.clone());
            }
        }
        Ok(failed)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    styles: Mutex<HashMap<Uuid, Style>>,
    presets: Mutex<HashMap<Uuid, SizePreset>>,
}

impl MemoryCatalog {
    pub fn put_style(&self, style: Style) {
        self.styles.lock().unwrap().insert(style.id, style);
    }

    pub fn put_preset(&self, preset: SizePreset) {
        self.presets.lock().unwrap().insert(preset.id, preset);
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get_style(&self, id: Uuid) -> Result<Style, StoreError> {
        self.styles
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::StyleNotFound(id))
    }

    async fn get_size_preset(&self, id: Uuid) -> Result<SizePreset, StoreError> {
        self.presets
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::SizePresetNotFound(id))
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    download_delay: Mutex<Option<Duration>>,
    fail_uploads: AtomicBool,
    unreachable: AtomicBool,
}

impl MemoryObjectStore {
    pub fn put(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn delay_downloads(&self, delay: Duration) {
        *self.download_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let delay = *self.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.get(key).ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn upload(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String, StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: 503,
            });
        }
        self.put(key, data);
        Ok(key.to_string())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StorageError::Config("bucket unreachable".to_string()));
        }
        Ok(())
    }
}

/// Mirrors the Redis pending/processing list pair.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<JobHandle>>,
    processing: Mutex<Vec<JobHandle>>,
}

impl MemoryQueue {
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn processing_len(&self) -> usize {
        self.processing.lock().unwrap().len()
    }
}

#[async_trait]
impl RenderQueue for MemoryQueue {
    async fn claim_next(&self) -> Result<Option<JobHandle>, QueueError> {
        let next = self.pending.lock().unwrap().pop_back();
        if let Some(handle) = &next {
            self.processing.lock().unwrap().push(handle.clone());
        }
        Ok(next)
    }

    async fn release(&self, handle: &JobHandle) -> Result<(), QueueError> {
        let mut processing = self.processing.lock().unwrap();
        if let Some(pos) = processing.iter().position(|h| h == handle) {
            processing.remove(pos);
        }
        Ok(())
    }

    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let handle = JobHandle::new(job_id)?;
        self.pending.lock().unwrap().push_front(handle);
        Ok(())
    }

    async fn in_flight(&self) -> Result<Vec<JobHandle>, QueueError> {
        Ok(self.processing.lock().unwrap().clone())
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.pending_len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// An [`AppState`] wired to in-memory collaborators, with handles to each.
pub struct Harness {
    pub state: AppState,
    pub jobs: Arc<MemoryJobStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryQueue>,
}

impl Harness {
    pub fn new(job_timeout: Duration) -> Self {
        let jobs = Arc::new(MemoryJobStore::default());
        let catalog = Arc::new(MemoryCatalog::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let queue = Arc::new(MemoryQueue::default());
        let state = AppState::from_parts(
            jobs.clone(),
            catalog.clone(),
            objects.clone(),
            queue.clone(),
            job_timeout,
        );
        Self {
            state,
            jobs,
            catalog,
            objects,
            queue,
        }
    }

    pub fn add_style(&self, slug: &str, version: &str, config: serde_json::Value) -> Style {
        let style = Style {
            id: Uuid::new_v4(),
            name: slug.to_string(),
            slug: slug.to_string(),
            algorithm_config: config,
            algorithm_version: version.to_string(),
        };
        self.catalog.put_style(style.clone());
        style
    }

    pub fn add_preset(&self, width: f64, height: f64, resolution: i32) -> SizePreset {
        let preset = SizePreset {
            id: Uuid::new_v4(),
            name: format!("{}x{}@{}", width, height, resolution),
            width,
            height,
            resolution,
        };
        self.catalog.put_preset(preset.clone());
        preset
    }

    /// Store the source, create a queued job and enqueue it.
    pub async fn submit(&self, source: Vec<u8>, style: &Style, preset: &SizePreset) -> RenderJob {
        let asset_ref = format!("uploads/{}.png", Uuid::new_v4());
        self.objects.put(&asset_ref, source);
        let job = RenderJob::new(asset_ref, style.id, preset.id, Utc::now());
        self.jobs.insert(job.clone());
        self.queue.enqueue(job.id).await.unwrap();
        job
    }

    pub async fn claim(&self) -> JobHandle {
        self.queue
            .claim_next()
            .await
            .unwrap()
            .expect("a job should be queued")
    }
}
