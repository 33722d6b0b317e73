//! Deferred job execution
//!
//! HTTP handlers answer as soon as their job is queued. A fixed pool of tokio workers
//! drains the queue, records every status change in a registry, and broadcasts terminal
//! statuses so callers can wait for a job or watch all of them.

use crate::{
    error::{BgChangerError, Result},
    pipeline::{ChangeBackgroundJob, JobOutput, Pipeline, RemoveBackgroundJob},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identifier of a queued job
pub type JobId = Uuid;

const QUEUE_CAPACITY: usize = 1024;
const EVENT_CAPACITY: usize = 256;

/// How long finished jobs stay in the registry unless configured otherwise
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Work accepted by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    ChangeBackground(ChangeBackgroundJob),
    RemoveBackground(RemoveBackgroundJob),
}

impl Job {
    #[must_use]
    pub fn kind(&self) -> JobKind {
        match self {
            Self::ChangeBackground(_) => JobKind::ChangeBackground,
            Self::RemoveBackground(_) => JobKind::RemoveBackground,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ChangeBackground,
    RemoveBackground,
}

/// Lifecycle of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed {
        output_path: PathBuf,
        blob_url: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl JobStatus {
    /// Completed or failed
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

impl From<Result<JobOutput>> for JobStatus {
    fn from(result: Result<JobOutput>) -> Self {
        match result {
            Ok(output) => Self::Completed {
                output_path: output.output_path,
                blob_url: output.blob_url,
            },
            Err(e) => Self::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Registry entry for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    #[serde(flatten)]
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Broadcast when a job reaches a terminal status
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
}

/// Job records plus the retention applied to finished ones
#[derive(Debug)]
struct Registry {
    records: RwLock<HashMap<JobId, JobRecord>>,
    retention: Duration,
}

impl Registry {
    fn new(retention: Duration) -> Self {
        Self {
            records: RwLock::default(),
            retention,
        }
    }

    fn set_status(&self, id: JobId, status: JobStatus) {
        let Ok(mut records) = self.records.write() else {
            return;
        };
        if status.is_terminal() {
            self.prune_finished(&mut records, id);
        }
        if let Some(record) = records.get_mut(&id) {
            if status.is_terminal() {
                record.finished_at = Some(Utc::now());
            }
            record.status = status;
        }
    }

    /// Drop finished records older than the retention, except `keep`
    fn prune_finished(&self, records: &mut HashMap<JobId, JobRecord>, keep: JobId) {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            return;
        };

        let before = records.len();
        records.retain(|id, record| {
            *id == keep || record.finished_at.map_or(true, |finished| finished > cutoff)
        });
        let pruned = before - records.len();
        if pruned > 0 {
            tracing::debug!(pruned, "expired finished jobs");
        }
    }
}

/// Queue of deferred jobs processed by a fixed worker pool
pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<(JobId, Job)>>>,
    registry: Arc<Registry>,
    events: broadcast::Sender<JobEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let jobs = self.registry.records.read().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("JobQueue")
            .field("jobs", &jobs)
            .field("retention", &self.registry.retention)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    /// Spawn `workers` tasks (at least one) consuming the queue
    ///
    /// Finished jobs are kept for [`DEFAULT_JOB_RETENTION`]. Must be called within a
    /// tokio runtime.
    #[must_use]
    pub fn start(pipeline: Arc<Pipeline>, workers: usize) -> Self {
        Self::start_with_retention(pipeline, workers, DEFAULT_JOB_RETENTION)
    }

    /// Like [`Self::start`], expiring finished jobs once they are older than `retention`
    ///
    /// Expired records are dropped whenever another job finishes.
    #[must_use]
    pub fn start_with_retention(
        pipeline: Arc<Pipeline>,
        workers: usize,
        retention: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let registry = Arc::new(Registry::new(retention));

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&pipeline),
                    Arc::clone(&receiver),
                    Arc::clone(&registry),
                    events.clone(),
                ))
            })
            .collect();
        tracing::info!(workers = workers.max(1), "job queue started");

        Self {
            sender: Mutex::new(Some(sender)),
            registry,
            events,
            workers: Mutex::new(handles),
        }
    }

    /// Register `job` as queued and hand it to the workers
    ///
    /// # Errors
    /// - The queue has been shut down
    pub async fn submit(&self, job: Job) -> Result<JobId> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| BgChangerError::internal("job queue lock poisoned"))?
            .clone()
            .ok_or_else(|| BgChangerError::internal("job queue is shut down"))?;

        let id = Uuid::new_v4();
        let kind = job.kind();
        if let Ok(mut records) = self.registry.records.write() {
            records.insert(
                id,
                JobRecord {
                    id,
                    kind,
                    status: JobStatus::Queued,
                    submitted_at: Utc::now(),
                    finished_at: None,
                },
            );
        }

        if sender.send((id, job)).await.is_err() {
            let status = JobStatus::Failed {
                error: "job queue is shut down".to_string(),
            };
            self.registry.set_status(id, status);
            return Err(BgChangerError::internal("job queue is shut down"));
        }
        tracing::debug!(job_id = %id, kind = ?kind, "job queued");
        Ok(id)
    }

    /// Current record of a job
    #[must_use]
    pub fn status(&self, id: JobId) -> Option<JobRecord> {
        self.registry.records.read().ok()?.get(&id).cloned()
    }

    /// Receive an event for every job that completes or fails from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Wait until job `id` reaches a terminal status
    ///
    /// # Errors
    /// - `NotFound` for unknown ids
    /// - The queue was shut down before the job finished
    pub async fn wait(&self, id: JobId) -> Result<JobStatus> {
        let mut events = self.subscribe();
        loop {
            let record = self
                .status(id)
                .ok_or_else(|| BgChangerError::not_found(format!("job {}", id)))?;
            if record.status.is_terminal() {
                return Ok(record.status);
            }

            match events.recv().await {
                Ok(event) if event.id == id => return Ok(event.status),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(BgChangerError::internal("job queue closed before job finished"));
                },
            }
        }
    }

    /// Stop accepting jobs, let workers drain the queue, and join them
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = self
            .workers
            .lock()
            .map(|mut workers| std::mem::take(&mut *workers))
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "job worker panicked");
            }
        }
        tracing::info!("job queue stopped");
    }
}

async fn worker_loop(
    worker: usize,
    pipeline: Arc<Pipeline>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<(JobId, Job)>>>,
    registry: Arc<Registry>,
    events: broadcast::Sender<JobEvent>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some((id, job)) = next else {
            break;
        };

        let kind = job.kind();
        registry.set_status(id, JobStatus::Running);
        tracing::debug!(worker, job_id = %id, "job started");

        let result = match &job {
            Job::ChangeBackground(job) => pipeline.change_background(job).await,
            Job::RemoveBackground(job) => pipeline.remove_background(job).await,
        };
        if let Err(e) = &result {
            tracing::error!(worker, job_id = %id, error = %e, "job failed");
        }

        let status = JobStatus::from(result);
        registry.set_status(id, status.clone());
        // No subscribers is fine; the registry keeps the outcome
        let _ = events.send(JobEvent { id, kind, status });
    }
    tracing::debug!(worker, "job worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::ForegroundExtractor;
    use image::{DynamicImage, RgbaImage};

    struct Failing;

    impl ForegroundExtractor for Failing {
        fn extract(&self, _image: &DynamicImage) -> Result<RgbaImage> {
            Err(BgChangerError::inference("boom"))
        }
    }

    fn queue() -> JobQueue {
        JobQueue::start(Arc::new(Pipeline::new(Arc::new(Failing), None, 90)), 2)
    }

    fn missing_input_job(dir: &std::path::Path) -> Job {
        Job::RemoveBackground(RemoveBackgroundJob {
            image_path: dir.join("missing.jpg"),
            cutout_path: dir.join("out.png"),
            crop: true,
        })
    }

    #[tokio::test]
    async fn test_failed_job_is_recorded_and_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue();
        let mut events = queue.subscribe();

        let id = queue.submit(missing_input_job(dir.path())).await.unwrap();
        let status = queue.wait(id).await.unwrap();
        assert!(matches!(status, JobStatus::Failed { .. }));

        let event = events.recv().await.unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.kind, JobKind::RemoveBackground);

        let record = queue.status(id).unwrap();
        assert!(record.finished_at.is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_jobs_expire_after_retention() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(Pipeline::new(Arc::new(Failing), None, 90));
        let queue = JobQueue::start_with_retention(pipeline, 1, Duration::ZERO);

        let first = queue.submit(missing_input_job(dir.path())).await.unwrap();
        queue.wait(first).await.unwrap();
        assert!(queue.status(first).is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.submit(missing_input_job(dir.path())).await.unwrap();
        queue.wait(second).await.unwrap();

        assert!(queue.status(first).is_none());
        assert!(queue.status(second).unwrap().finished_at.is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_recent_jobs_outlive_later_completions() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue();

        let first = queue.submit(missing_input_job(dir.path())).await.unwrap();
        queue.wait(first).await.unwrap();
        let second = queue.submit(missing_input_job(dir.path())).await.unwrap();
        queue.wait(second).await.unwrap();

        assert!(queue.status(first).is_some());
        assert!(queue.status(second).is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let queue = queue();
        assert!(queue.status(Uuid::new_v4()).is_none());
        assert!(matches!(
            queue.wait(Uuid::new_v4()).await,
            Err(BgChangerError::NotFound(_))
        ));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue();
        queue.shutdown().await;
        assert!(queue.submit(missing_input_job(dir.path())).await.is_err());
    }

    #[test]
    fn test_status_serialization() {
        let status = JobStatus::Completed {
            output_path: PathBuf::from("media/chbg.jpg"),
            blob_url: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["output_path"], "media/chbg.jpg");
        assert!(!JobStatus::Queued.is_terminal());
        assert!(status.is_terminal());
    }
}
