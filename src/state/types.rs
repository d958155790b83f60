use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subforged_common::{Error, JobId, Result};

use crate::storage::ArtifactRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// Percentage in `[0, 100]`; exactly 100 once completed, meaningless once failed.
    pub progress: u8,
    pub input: ArtifactRef,
    /// Present if and only if `state` is `Completed`.
    pub output: Option<ArtifactRef>,
    /// Present if and only if `state` is `Failed`.
    pub error: Option<String>,
    /// Original name of the upload, for display.
    pub source_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Job {
    pub(super) fn new(input: ArtifactRef, source_name: Option<String>) -> Self {
        Self {
            id: JobId::new(),
            state: JobState::Queued,
            progress: 0,
            input,
            output: None,
            error: None,
            source_name,
            created_at: Utc::now(),
            started_at: None,
            terminated_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Queued -> Running. Returns whether the state changed.
    pub(super) fn start(&mut self) -> bool {
        if self.state != JobState::Queued {
            return false;
        }
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Raise progress to `percent` (clamped, rounded). Lower values are
    /// ignored. Returns the new value when it changed.
    pub(super) fn advance_progress(&mut self, percent: f64) -> Option<u8> {
        if self.is_terminal() || percent.is_nan() {
            return None;
        }
        self.start();

        let value = percent.clamp(0.0, 100.0).round() as u8;
        if value <= self.progress {
            return None;
        }
        self.progress = value;
        Some(value)
    }

    pub(super) fn complete(&mut self, output: ArtifactRef) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::invalid_transition(self.id, self.state));
        }
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.state = JobState::Completed;
        self.progress = 100;
        self.output = Some(output);
        self.terminated_at = Some(Utc::now());
        Ok(())
    }

    pub(super) fn fail(&mut self, reason: &str) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::invalid_transition(self.id, self.state));
        }
        self.state = JobState::Failed;
        self.error = Some(reason.to_string());
        self.terminated_at = Some(Utc::now());
        Ok(())
    }
}

/// Number of tracked jobs per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed
    }

    pub(super) fn record(&mut self, state: JobState) {
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Running => self.running += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}
