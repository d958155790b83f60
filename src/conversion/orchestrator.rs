//! Public job operations: submit, query and artifact resolution.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use subforged_common::paths::{content_type_essence, sanitize_file_name};
use subforged_common::{Error, JobId, Result};

use super::TranscodeRunner;
use crate::config::Config;
use crate::engine::TranscodingEngine;
use crate::state::{JobState, JobStore};
use crate::storage::{ArtifactRef, BlobStorage};

/// An uploaded input as the transport layer received it.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied file name, used for display and output naming only.
    pub file_name: String,
    /// Declared content type.
    pub content_type: String,
    pub bytes: Bytes,
}

/// Snapshot of a job returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    /// `None` once the job has failed.
    pub progress: Option<u8>,
    pub error: Option<String>,
    /// Original upload name.
    pub file_name: Option<String>,
    /// Output reference once completed.
    pub output: Option<ArtifactRef>,
}

/// An output reference that passed the path-safety check and exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedArtifact {
    pub reference: ArtifactRef,
    pub path: PathBuf,
}

impl ResolvedArtifact {
    /// File name to offer in a download.
    pub fn download_name(&self) -> &str {
        Path::new(self.reference.as_str())
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(self.reference.as_str())
    }
}

/// Submission rules applied before anything is stored.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub allowed_content_types: Vec<String>,
    pub max_upload_bytes: u64,
    pub output_extension: String,
    pub timeout: Option<Duration>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            allowed_content_types: config
                .upload
                .allowed_content_types
                .iter()
                .map(|ct| content_type_essence(ct))
                .collect(),
            max_upload_bytes: config.upload.max_upload_bytes,
            output_extension: config.conversion.output_extension.clone(),
            timeout: config.conversion.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct JobOrchestrator {
    store: Arc<JobStore>,
    inputs: Arc<dyn BlobStorage>,
    outputs: Arc<dyn BlobStorage>,
    runner: TranscodeRunner,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<JobStore>,
        engine: Arc<dyn TranscodingEngine>,
        inputs: Arc<dyn BlobStorage>,
        outputs: Arc<dyn BlobStorage>,
        settings: OrchestratorSettings,
    ) -> Self {
        let runner = TranscodeRunner::new(
            store.clone(),
            engine,
            inputs.clone(),
            outputs.clone(),
        )
        .with_timeout(settings.timeout);

        Self {
            store,
            inputs,
            outputs,
            runner,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Validate and persist an upload, register a job and start converting it.
    ///
    /// Returns as soon as the engine has been started; the conversion itself
    /// continues in the background. Validation and storage failures create no
    /// job. If the engine cannot be started the job exists and is already
    /// `Failed` when this returns.
    pub async fn submit(&self, upload: Upload) -> Result<JobId> {
        let content_type = content_type_essence(&upload.content_type);
        if !self
            .settings
            .allowed_content_types
            .iter()
            .any(|allowed| *allowed == content_type)
        {
            return Err(Error::UnsupportedMediaType(upload.content_type));
        }

        if upload.bytes.is_empty() {
            return Err(Error::Validation("uploaded file is empty".into()));
        }
        if upload.bytes.len() as u64 > self.settings.max_upload_bytes {
            return Err(Error::Validation(format!(
                "uploaded file exceeds {} bytes",
                self.settings.max_upload_bytes
            )));
        }

        let input = self.inputs.put(&upload.file_name, upload.bytes).await?;
        let output = self.outputs.allocate(&self.output_hint(&upload.file_name));

        let id = self.store.create(input.clone(), Some(upload.file_name));
        tracing::info!(job_id = %id, input = %input, "Accepted upload");

        // The supervising task is detached; callers observe it through `query`.
        let _ = self.runner.run(id, input, output).await;

        Ok(id)
    }

    /// Current state of a job.
    pub fn query(&self, id: JobId) -> Result<JobStatus> {
        let job = self.store.get(id)?;
        Ok(JobStatus {
            id: job.id,
            state: job.state,
            progress: (job.state != JobState::Failed).then_some(job.progress),
            error: job.error,
            file_name: job.source_name,
            output: job.output,
        })
    }

    /// Output of a completed job, verified to lie inside the output root.
    pub async fn resolve_artifact(&self, id: JobId) -> Result<ResolvedArtifact> {
        let job = self.store.get(id)?;
        if job.state != JobState::Completed {
            return Err(Error::not_ready(id, job.state));
        }
        let reference = job
            .output
            .ok_or_else(|| Error::Internal(format!("completed job {id} has no output")))?;

        self.resolve_reference(reference.as_str()).await
    }

    /// Resolve a raw output reference, such as a file name from a download URL.
    ///
    /// Traversal attempts are rejected before the filesystem is consulted.
    /// Only outputs recorded on a completed job are served, so a file still
    /// being written by a running conversion is reported as not found.
    pub async fn resolve_reference(&self, reference: &str) -> Result<ResolvedArtifact> {
        let reference = ArtifactRef::new(reference);
        let path = self.outputs.resolve(&reference)?;
        if self.store.find_by_output(&reference).is_none()
            || !self.outputs.exists(&reference).await
        {
            return Err(Error::not_found("artifact", &reference));
        }
        Ok(ResolvedArtifact { reference, path })
    }

    fn output_hint(&self, file_name: &str) -> String {
        let sanitized = sanitize_file_name(file_name);
        let stem = Path::new(&sanitized)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("output");
        format!("{}.{}", stem, self.settings.output_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineHandle, EngineSignal};
    use crate::storage::LocalStorage;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    /// Engine that writes a partial output, then finishes it and succeeds once
    /// `release` is notified.
    struct GatedEngine {
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl TranscodingEngine for GatedEngine {
        async fn start(&self, _input: &Path, output: &Path) -> Result<EngineHandle> {
            tokio::fs::write(output, b"WEB").await?;
            let (tx, handle) = EngineHandle::channel(8);
            let release = self.release.clone();
            let output = output.to_path_buf();
            tokio::spawn(async move {
                let _ = tx.send(EngineSignal::Started).await;
                let _ = tx.send(EngineSignal::Progress(40.0)).await;
                release.notified().await;
                tokio::fs::write(&output, b"WEBVTT\n").await.unwrap();
                let _ = tx.send(EngineSignal::Succeeded).await;
            });
            Ok(handle)
        }
    }

    fn orchestrator(
        dir: &Path,
        release: Arc<tokio::sync::Notify>,
    ) -> (JobOrchestrator, Arc<LocalStorage>) {
        let inputs = Arc::new(LocalStorage::open(dir.join("uploads")).unwrap());
        let outputs = Arc::new(LocalStorage::open(dir.join("output")).unwrap());
        let orchestrator = JobOrchestrator::new(
            JobStore::new(),
            Arc::new(GatedEngine { release }),
            inputs,
            outputs.clone(),
            OrchestratorSettings::default(),
        );
        (orchestrator, outputs)
    }

    fn upload(content_type: &str) -> Upload {
        Upload {
            file_name: "Holiday Clip.mp4".into(),
            content_type: content_type.into(),
            bytes: Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"),
        }
    }

    async fn wait_terminal(orchestrator: &JobOrchestrator, id: JobId) -> JobStatus {
        for _ in 0..200 {
            let status = orchestrator.query(id).unwrap();
            if status.state.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} never finished");
    }

    #[tokio::test]
    async fn test_submit_rejects_unsupported_type() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(dir.path(), Arc::new(Default::default()));

        let result = orchestrator.submit(upload("image/png")).await;
        assert_matches!(result, Err(Error::UnsupportedMediaType(ct)) if ct == "image/png");
        assert!(orchestrator.store().is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_submit_accepts_parameters_and_case() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(dir.path(), Arc::new(Default::default()));

        let id = orchestrator
            .submit(upload("Video/MP4; codecs=avc1"))
            .await
            .unwrap();
        assert!(!orchestrator.query(id).unwrap().state.is_terminal());
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_and_oversize() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = Arc::new(LocalStorage::open(dir.path().join("uploads")).unwrap());
        let outputs = Arc::new(LocalStorage::open(dir.path().join("output")).unwrap());
        let settings = OrchestratorSettings {
            max_upload_bytes: 4,
            ..OrchestratorSettings::default()
        };
        let orchestrator = JobOrchestrator::new(
            JobStore::new(),
            Arc::new(GatedEngine {
                release: Arc::new(Default::default()),
            }),
            inputs,
            outputs,
            settings,
        );

        let mut empty = upload("video/mp4");
        empty.bytes = Bytes::new();
        assert_matches!(orchestrator.submit(empty).await, Err(Error::Validation(_)));
        assert_matches!(
            orchestrator.submit(upload("video/mp4")).await,
            Err(Error::Validation(_))
        );
        assert!(orchestrator.store().is_empty());
    }

    #[tokio::test]
    async fn test_artifact_not_ready_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let release = Arc::new(tokio::sync::Notify::new());
        let (orchestrator, outputs) = orchestrator(dir.path(), release.clone());

        let id = orchestrator.submit(upload("video/mp4")).await.unwrap();
        assert_matches!(
            orchestrator.resolve_artifact(id).await,
            Err(Error::NotReady { .. })
        );

        release.notify_one();
        let status = wait_terminal(&orchestrator, id).await;
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, Some(100));
        assert_eq!(status.file_name.as_deref(), Some("Holiday Clip.mp4"));

        let artifact = orchestrator.resolve_artifact(id).await.unwrap();
        assert!(artifact.reference.as_str().ends_with("-Holiday_Clip.srt"));
        assert!(artifact.path.starts_with(outputs.root().canonicalize().unwrap()));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"WEBVTT\n");
        assert!(artifact.download_name().ends_with(".srt"));
    }

    #[tokio::test]
    async fn test_query_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(dir.path(), Arc::new(Default::default()));

        assert_matches!(orchestrator.query(JobId::new()), Err(Error::NotFound { .. }));
        assert_matches!(
            orchestrator.resolve_artifact(JobId::new()).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_resolve_reference_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"nope").unwrap();
        let (orchestrator, _) = orchestrator(dir.path(), Arc::new(Default::default()));

        assert_matches!(
            orchestrator.resolve_reference("../secret.txt").await,
            Err(Error::PathTraversal(_))
        );
        assert_matches!(
            orchestrator.resolve_reference("missing.srt").await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_resolve_reference_ignores_running_output() {
        let dir = tempfile::tempdir().unwrap();
        let release = Arc::new(tokio::sync::Notify::new());
        let (orchestrator, outputs) = orchestrator(dir.path(), release.clone());

        let id = orchestrator.submit(upload("video/mp4")).await.unwrap();

        // The engine has already written part of its output.
        let partial = std::fs::read_dir(outputs.root())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .file_name()
            .into_string()
            .unwrap();
        assert_matches!(
            orchestrator.resolve_reference(&partial).await,
            Err(Error::NotFound { .. })
        );

        release.notify_one();
        wait_terminal(&orchestrator, id).await;
        let artifact = orchestrator.resolve_artifact(id).await.unwrap();
        assert_eq!(artifact.reference.as_str(), partial);
        assert_eq!(orchestrator.resolve_reference(&partial).await.unwrap(), artifact);
    }

    #[test]
    fn test_output_hint() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(dir.path(), Arc::new(Default::default()));

        assert_eq!(orchestrator.output_hint("movie.final.mp4"), "movie.final.srt");
        assert_eq!(orchestrator.output_hint("../../x.mpeg"), "x.srt");
        assert_eq!(orchestrator.output_hint(""), "upload.srt");
    }

    #[test]
    fn test_failed_status_has_no_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(dir.path(), Arc::new(Default::default()));

        let id = orchestrator
            .store()
            .create(ArtifactRef::new("in.mp4"), None);
        orchestrator.store().update_progress(id, 70.0);
        orchestrator.store().fail(id, "unsupported codec").unwrap();

        let status = orchestrator.query(id).unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.progress, None);
        assert_eq!(status.error.as_deref(), Some("unsupported codec"));
    }
}
