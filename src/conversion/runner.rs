//! Drives one engine invocation per job into a terminal state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use subforged_common::{Error, JobId, Result};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineHandle, EngineSignal, TranscodingEngine};
use crate::state::JobStore;
use crate::storage::{ArtifactRef, BlobStorage};

/// How a conversion ended, as decided by the first terminal signal.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Succeeded,
    Failed(String),
}

/// Runs conversions and guarantees every started job becomes terminal.
#[derive(Clone)]
pub struct TranscodeRunner {
    store: Arc<JobStore>,
    engine: Arc<dyn TranscodingEngine>,
    inputs: Arc<dyn BlobStorage>,
    outputs: Arc<dyn BlobStorage>,
    timeout: Option<Duration>,
}

impl TranscodeRunner {
    pub fn new(
        store: Arc<JobStore>,
        engine: Arc<dyn TranscodingEngine>,
        inputs: Arc<dyn BlobStorage>,
        outputs: Arc<dyn BlobStorage>,
    ) -> Self {
        Self {
            store,
            engine,
            inputs,
            outputs,
            timeout: None,
        }
    }

    /// Fail conversions that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Start converting `input` into `output` for job `id`.
    ///
    /// The conversion is owned by a spawned task from the first await, so the
    /// job reaches a terminal state even if the caller goes away. Only the
    /// engine start is awaited here: when it fails the job is already failed
    /// and `None` is returned, otherwise the task keeps draining engine
    /// signals until the job is terminal.
    pub async fn run(
        &self,
        id: JobId,
        input: ArtifactRef,
        output: ArtifactRef,
    ) -> Option<JoinHandle<()>> {
        let (started_tx, started_rx) = oneshot::channel();
        let runner = self.clone();
        let task = tokio::spawn(async move {
            runner.convert(id, input, output, started_tx).await;
        });

        match started_rx.await {
            Ok(true) => Some(task),
            _ => None,
        }
    }

    async fn convert(
        self,
        id: JobId,
        input: ArtifactRef,
        output: ArtifactRef,
        started: oneshot::Sender<bool>,
    ) {
        let deadline = self.timeout.map(|limit| Instant::now() + limit);

        let handle = match self.within(deadline, self.start_engine(&input, &output)).await {
            Some(Ok(handle)) => handle,
            Some(Err(e)) => {
                let reason = start_failure_reason(e);
                error!(job_id = %id, "Engine failed to start: {}", reason);
                self.finish(id, &input, &output, Outcome::Failed(reason)).await;
                let _ = started.send(false);
                return;
            }
            None => {
                warn!(job_id = %id, "Engine start exceeded {:?}", self.timeout);
                self.finish(id, &input, &output, self.timed_out()).await;
                let _ = started.send(false);
                return;
            }
        };

        info!(job_id = %id, input = %input, output = %output, "Conversion started");
        let _ = started.send(true);

        self.supervise(id, input, output, handle, deadline).await;
    }

    async fn start_engine(
        &self,
        input: &ArtifactRef,
        output: &ArtifactRef,
    ) -> Result<EngineHandle> {
        let input_path = self.inputs.resolve(input)?;
        let output_path = self.outputs.resolve(output)?;
        self.engine.start(&input_path, &output_path).await
    }

    /// Run `fut` to completion, or give up at `deadline`.
    async fn within<F: Future>(&self, deadline: Option<Instant>, fut: F) -> Option<F::Output> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
            None => Some(fut.await),
        }
    }

    fn timed_out(&self) -> Outcome {
        let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
        Outcome::Failed(format!("conversion timed out after {secs}s"))
    }

    async fn supervise(
        self,
        id: JobId,
        input: ArtifactRef,
        output: ArtifactRef,
        mut handle: EngineHandle,
        deadline: Option<Instant>,
    ) {
        let outcome = match self.within(deadline, self.drain(id, &mut handle)).await {
            Some(outcome) => outcome,
            None => {
                warn!(job_id = %id, "Conversion exceeded {:?}", self.timeout);
                self.timed_out()
            }
        };

        // Nobody reads signals past the first terminal one.
        drop(handle);

        self.finish(id, &input, &output, outcome).await;
    }

    /// Forward engine signals to the store until the first terminal one.
    async fn drain(&self, id: JobId, handle: &mut EngineHandle) -> Outcome {
        while let Some(signal) = handle.next().await {
            match signal {
                EngineSignal::Started => self.store.mark_running(id),
                EngineSignal::Progress(percent) => self.store.update_progress(id, percent),
                EngineSignal::Succeeded => return Outcome::Succeeded,
                EngineSignal::Failed(reason) => return Outcome::Failed(reason),
            }
        }
        Outcome::Failed("engine exited without reporting a result".to_string())
    }

    /// Record the terminal state, then release the input.
    async fn finish(
        &self,
        id: JobId,
        input: &ArtifactRef,
        output: &ArtifactRef,
        outcome: Outcome,
    ) {
        let outcome = if outcome == Outcome::Succeeded && !self.outputs.exists(output).await {
            Outcome::Failed("engine reported success but produced no output".to_string())
        } else {
            outcome
        };

        let recorded = match &outcome {
            Outcome::Succeeded => self.store.complete(id, output.clone()),
            Outcome::Failed(reason) => {
                error!(job_id = %id, "Conversion failed: {}", reason);
                self.store.fail(id, reason)
            }
        };

        let completed = match recorded {
            Ok(()) => matches!(outcome, Outcome::Succeeded),
            Err(Error::InvalidTransition { state, .. }) => {
                debug!(job_id = %id, "Job already {}, ignoring {:?}", state, outcome);
                false
            }
            Err(e) => {
                warn!(job_id = %id, "Could not record conversion result: {}", e);
                false
            }
        };

        if let Err(e) = self.inputs.delete(input).await {
            warn!(job_id = %id, input = %input, "Failed to remove input: {}", e);
        }

        // Only a recorded completion keeps its output.
        if !completed {
            if let Err(e) = self.outputs.delete(output).await {
                warn!(job_id = %id, output = %output, "Failed to remove partial output: {}", e);
            }
        }
    }
}

fn start_failure_reason(error: Error) -> String {
    match error {
        Error::EngineFailure(reason) => reason,
        other => other.to_string(),
    }
}
