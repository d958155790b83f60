//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which wires temp-dir storage, a default config
//! and a full [`AppContext`] around a scripted engine, so conversions run
//! without ffmpeg.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;

use subforged::config::Config;
use subforged::conversion::{JobOrchestrator, JobStatus, Upload};
use subforged::engine::{EngineHandle, EngineSignal, TranscodingEngine};
use subforged::server::{create_router, AppContext};
use subforged_common::{Error, JobId, Result};

/// Subtitle body written by [`ScriptedEngine`] before it reports success.
pub const SUBTITLE_BODY: &[u8] = b"1\n00:00:00,000 --> 00:00:02,000\nHello\n";

/// Engine that replays `(delay, signal)` steps on its own task.
///
/// The output file is written right before a `Succeeded` step is sent.
#[derive(Clone)]
pub struct ScriptedEngine {
    steps: Vec<(Duration, EngineSignal)>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<(Duration, EngineSignal)>) -> Self {
        Self { steps }
    }

    /// Start, report a few progress values and succeed, all without delay.
    pub fn instant_success() -> Self {
        Self::new(vec![
            (Duration::ZERO, EngineSignal::Started),
            (Duration::ZERO, EngineSignal::Progress(25.0)),
            (Duration::ZERO, EngineSignal::Progress(75.0)),
            (Duration::ZERO, EngineSignal::Succeeded),
        ])
    }

    /// Start and then never finish.
    pub fn hangs() -> Self {
        Self::new(vec![
            (Duration::ZERO, EngineSignal::Started),
            (Duration::from_secs(3600), EngineSignal::Succeeded),
        ])
    }
}

#[async_trait]
impl TranscodingEngine for ScriptedEngine {
    async fn start(&self, input: &Path, output: &Path) -> Result<EngineHandle> {
        if !input.is_file() {
            return Err(Error::EngineFailure(format!("cannot read input {:?}", input)));
        }

        let (tx, handle) = EngineHandle::channel(16);
        let steps = self.steps.clone();
        let output = output.to_path_buf();

        tokio::spawn(async move {
            for (delay, signal) in steps {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if signal == EngineSignal::Succeeded
                    && tokio::fs::write(&output, SUBTITLE_BODY).await.is_err()
                {
                    return;
                }
                if tx.send(signal).await.is_err() {
                    return;
                }
            }
        });

        Ok(handle)
    }
}

/// Engine that takes `delay` to start, then behaves like `inner`.
pub struct SlowStartEngine {
    pub delay: Duration,
    pub inner: ScriptedEngine,
}

#[async_trait]
impl TranscodingEngine for SlowStartEngine {
    async fn start(&self, input: &Path, output: &Path) -> Result<EngineHandle> {
        tokio::time::sleep(self.delay).await;
        self.inner.start(input, output).await
    }
}

/// Engine whose process can never be started.
pub struct UnstartableEngine;

#[async_trait]
impl TranscodingEngine for UnstartableEngine {
    async fn start(&self, _input: &Path, _output: &Path) -> Result<EngineHandle> {
        Err(Error::tool("ffmpeg", "ffmpeg not found"))
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] on temp storage.
pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new harness with default configuration.
    pub fn new(engine: impl TranscodingEngine + 'static) -> Self {
        Self::with_config(Config::default(), engine)
    }

    /// Create a new harness with a custom configuration; storage directories
    /// are always redirected into a temp dir.
    pub fn with_config(mut config: Config, engine: impl TranscodingEngine + 'static) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.output_dir = dir.path().join("output");

        let ctx = AppContext::build(config, Arc::new(engine)).expect("failed to build context");
        Self { ctx, dir }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.ctx.orchestrator
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone(), None)
    }

    pub fn upload_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn output_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("output")
    }

    /// Poll until the job is terminal, panicking after `timeout`.
    pub async fn wait_for_terminal(&self, id: JobId, timeout: Duration) -> JobStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.orchestrator().query(id).expect("job vanished");
            if status.state.is_terminal() {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} still {} after {:?}",
                status.state,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// An MP4 upload with a few bytes of payload.
pub fn mp4_upload(file_name: &str) -> Upload {
    Upload {
        file_name: file_name.to_string(),
        content_type: "video/mp4".to_string(),
        bytes: Bytes::from_static(b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00"),
    }
}

/// Number of entries in a directory.
pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Build a `multipart/form-data` body with one file part.
pub fn multipart_body(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = "subforged-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}
