//! ffmpeg-backed [`TranscodingEngine`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use subforged_common::{Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;

use super::progress::{parse_duration_banner, percent, ProgressParser};
use super::{EngineHandle, EngineSignal, TranscodingEngine, SIGNAL_BUFFER};
use crate::config::ToolsConfig;

/// Number of trailing stderr lines kept for failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `ffmpeg -i <input> <output>` and reports progress from `-progress`.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    /// Locate ffmpeg via config or `PATH`.
    pub fn discover(tools: &ToolsConfig) -> Result<Self> {
        let ffmpeg = super::resolve_ffmpeg(tools)?;
        tracing::info!("Using ffmpeg at {:?}", ffmpeg);
        Ok(Self::new(ffmpeg))
    }

    pub fn path(&self) -> &Path {
        &self.ffmpeg
    }

    fn build_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            output.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl TranscodingEngine for FfmpegEngine {
    async fn start(&self, input: &Path, output: &Path) -> Result<EngineHandle> {
        let metadata = tokio::fs::metadata(input)
            .await
            .map_err(|e| Error::EngineFailure(format!("cannot read input {:?}: {e}", input)))?;
        if !metadata.is_file() {
            return Err(Error::EngineFailure(format!(
                "input {:?} is not a regular file",
                input
            )));
        }

        let args = Self::build_args(input, output);
        tracing::debug!("FFmpeg args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool("ffmpeg", format!("failed to spawn: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("ffmpeg stderr was not captured".into()))?;

        let (tx, handle) = EngineHandle::channel(SIGNAL_BUFFER);
        tokio::spawn(drive(child, stdout, stderr, tx));

        Ok(handle)
    }
}

/// Pump ffmpeg's output into signals until the process exits.
///
/// If the handle is dropped mid-conversion the child is killed.
async fn drive(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<EngineSignal>,
) {
    if tx.send(EngineSignal::Started).await.is_err() {
        let _ = child.kill().await;
        return;
    }

    let duration = Arc::new(Mutex::new(None));
    let stderr_task = tokio::spawn(collect_stderr(stderr, Arc::clone(&duration)));

    let mut lines = BufReader::new(stdout).lines();
    let mut parser = ProgressParser::default();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(sample) = parser.feed(&line) else { continue };
                    let pct = if sample.finished {
                        Some(100.0)
                    } else {
                        let total = *duration.lock();
                        total.and_then(|d| percent(sample.out_time_secs, d))
                    };
                    let Some(pct) = pct else { continue };
                    if tx.send(EngineSignal::Progress(pct)).await.is_err() {
                        let _ = child.kill().await;
                        return;
                    }
                }
                Ok(None) | Err(_) => break,
            },
            _ = tx.closed() => {
                tracing::debug!("Engine handle dropped, killing ffmpeg");
                let _ = child.kill().await;
                return;
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status,
        _ = tx.closed() => {
            let _ = child.kill().await;
            return;
        }
    };

    let tail = stderr_task.await.unwrap_or_default();

    let signal = match status {
        Ok(status) if status.success() => EngineSignal::Succeeded,
        Ok(status) => EngineSignal::Failed(describe_failure(&tail, status)),
        Err(e) => EngineSignal::Failed(format!("failed waiting for ffmpeg: {e}")),
    };
    let _ = tx.send(signal).await;
}

/// Read stderr to the end, recording the input duration and the last lines.
async fn collect_stderr(stderr: ChildStderr, duration: Arc<Mutex<Option<f64>>>) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut duration = duration.lock();
            if duration.is_none() {
                *duration = parse_duration_banner(&line);
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        tracing::trace!(target: "subforged::ffmpeg", "{}", trimmed);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(trimmed.to_string());
    }

    tail.into_iter().collect()
}

/// Pick the most specific error line ffmpeg printed.
fn describe_failure(tail: &[String], status: ExitStatus) -> String {
    tail.iter()
        .rev()
        .find(|line| {
            *line != "Conversion failed!"
                && !line.starts_with("frame=")
                && !line.starts_with("size=")
        })
        .cloned()
        .unwrap_or_else(|| format!("ffmpeg exited with status {status}"))
}
