//! Authoritative, concurrency-safe registry of conversion jobs.
//!
//! [`JobStore`] owns every [`Job`] record behind a single `RwLock`. Writers
//! hold the lock only for the in-memory mutation, readers receive cloned
//! snapshots, and every transition is broadcast as a [`JobEvent`] for
//! server-sent-event subscribers.

mod types;

pub use types::*;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subforged_common::{Error, JobId, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::ArtifactRef;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Job lifecycle event for SSE broadcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job has been created.
    Queued { job_id: JobId },
    /// The engine has started working on a job.
    Started { job_id: JobId },
    /// A job's stored progress went up.
    Progress { job_id: JobId, progress: u8 },
    /// A job has completed successfully.
    Completed { job_id: JobId, output: ArtifactRef },
    /// A job has failed.
    Failed { job_id: JobId, error: String },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Queued { job_id }
            | JobEvent::Started { job_id }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }
}

pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl JobStore {
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: JobEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("No subscribers for job event");
        }
    }

    /// Register a new job in state `Queued` with progress 0.
    pub fn create(&self, input: ArtifactRef, source_name: Option<String>) -> JobId {
        let job = Job::new(input, source_name);
        let id = job.id;

        {
            let mut jobs = self.jobs.write();
            jobs.insert(id, job);
        }

        tracing::debug!(job_id = %id, "Job queued");
        self.broadcast(JobEvent::Queued { job_id: id });
        id
    }

    /// Get a consistent snapshot of a job.
    pub fn get(&self, id: JobId) -> Result<Job> {
        let jobs = self.jobs.read();
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", id))
    }

    /// Move a queued job to `Running`. Anything else is left alone.
    pub fn mark_running(&self, id: JobId) {
        let started = {
            let mut jobs = self.jobs.write();
            jobs.get_mut(&id).map(|job| job.start()).unwrap_or(false)
        };

        if started {
            tracing::debug!(job_id = %id, "Job running");
            self.broadcast(JobEvent::Started { job_id: id });
        }
    }

    /// Record engine progress.
    ///
    /// Silently ignored for unknown or terminal jobs. Values are clamped to
    /// `[0, 100]` and never lower the stored progress.
    pub fn update_progress(&self, id: JobId, percent: f64) {
        let (started, advanced) = {
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.get_mut(&id) else {
                tracing::debug!(job_id = %id, "Progress for unknown job ignored");
                return;
            };
            let was_queued = job.state == JobState::Queued;
            let advanced = job.advance_progress(percent);
            (was_queued && job.state == JobState::Running, advanced)
        };

        if started {
            self.broadcast(JobEvent::Started { job_id: id });
        }
        if let Some(progress) = advanced {
            self.broadcast(JobEvent::Progress {
                job_id: id,
                progress,
            });
        }
    }

    /// The completed job whose recorded output is `output`, if any.
    pub fn find_by_output(&self, output: &ArtifactRef) -> Option<Job> {
        let jobs = self.jobs.read();
        jobs.values()
            .find(|job| job.output.as_ref() == Some(output))
            .cloned()
    }

    /// Transition to `Completed` with the given output.
    ///
    /// Fails with [`Error::InvalidTransition`] if the job is already terminal,
    /// leaving the record untouched.
    pub fn complete(&self, id: JobId, output: ArtifactRef) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("job", id))?;
            job.complete(output.clone())?;
        }

        tracing::info!(job_id = %id, output = %output, "Job completed");
        self.broadcast(JobEvent::Completed { job_id: id, output });
        Ok(())
    }

    /// Transition to `Failed` with a human-readable reason.
    ///
    /// Safe to call from a supervisor racing the engine: whichever terminal
    /// call lands first wins and the other gets [`Error::InvalidTransition`].
    pub fn fail(&self, id: JobId, reason: &str) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("job", id))?;
            job.fail(reason)?;
        }

        tracing::warn!(job_id = %id, error = %reason, "Job failed");
        self.broadcast(JobEvent::Failed {
            job_id: id,
            error: reason.to_string(),
        });
        Ok(())
    }

    /// Remove terminal jobs that finished more than `ttl` ago.
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = chrono::Utc::now() - ttl;

        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| match job.terminated_at {
            Some(at) => at > cutoff,
            None => true,
        });
        before - jobs.len()
    }

    pub fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read();
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            counts.record(job.state);
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

/// Periodically evict expired terminal jobs until `cancel` fires.
pub fn spawn_retention_sweeper(
    store: Arc<JobStore>,
    ttl: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = store.evict_expired(ttl);
                    if evicted > 0 {
                        tracing::info!("Evicted {} expired jobs", evicted);
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        tracing::debug!("Retention sweeper stopped");
    })
}
