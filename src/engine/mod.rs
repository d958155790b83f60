//! Transcoding engine integration.
//!
//! An engine is started with an input and an output path and reports back
//! through a finite set of [`EngineSignal`]s. Whatever the engine does
//! internally, consumers only ever see `Started`, any number of `Progress`
//! values, and (ideally) one terminal signal.

mod ffmpeg;
pub mod progress;
mod tools;

pub use ffmpeg::FfmpegEngine;
pub use tools::{check_tools, resolve_ffmpeg, ToolInfo};

use async_trait::async_trait;
use std::path::Path;
use subforged_common::Result;
use tokio::sync::mpsc;

/// Default buffer for signal channels; progress is coalesced by the consumer.
pub const SIGNAL_BUFFER: usize = 64;

/// Something the engine reported about a running conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// The engine process is up and working.
    Started,
    /// Percentage in engine terms; may be out of range, repeated or regress.
    Progress(f64),
    /// The output was written successfully.
    Succeeded,
    /// The conversion failed with a human-readable reason.
    Failed(String),
}

impl EngineSignal {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineSignal::Succeeded | EngineSignal::Failed(_))
    }
}

/// Receiving side of a started conversion.
///
/// Dropping the handle tells the engine nobody is listening anymore; the
/// ffmpeg engine kills its child process when that happens.
#[derive(Debug)]
pub struct EngineHandle {
    signals: mpsc::Receiver<EngineSignal>,
}

impl EngineHandle {
    /// Create a connected sender/handle pair.
    pub fn channel(capacity: usize) -> (mpsc::Sender<EngineSignal>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { signals: rx })
    }

    /// Next signal, or `None` once the engine side has gone away.
    pub async fn next(&mut self) -> Option<EngineSignal> {
        self.signals.recv().await
    }
}

/// External engine performing the actual transformation.
#[async_trait]
pub trait TranscodingEngine: Send + Sync {
    /// Start converting `input` into `output`.
    ///
    /// Returns an error when the conversion cannot even be started (missing
    /// binary, unreadable input). Once this returns `Ok`, every later failure
    /// is reported as [`EngineSignal::Failed`].
    async fn start(&self, input: &Path, output: &Path) -> Result<EngineHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_ends_when_sender_dropped() {
        let (tx, mut handle) = EngineHandle::channel(4);
        tx.send(EngineSignal::Started).await.unwrap();
        tx.send(EngineSignal::Progress(12.5)).await.unwrap();
        drop(tx);

        assert_eq!(handle.next().await, Some(EngineSignal::Started));
        assert_eq!(handle.next().await, Some(EngineSignal::Progress(12.5)));
        assert_eq!(handle.next().await, None);
    }

    #[test]
    fn test_terminal_signals() {
        assert!(EngineSignal::Succeeded.is_terminal());
        assert!(EngineSignal::Failed("x".into()).is_terminal());
        assert!(!EngineSignal::Started.is_terminal());
        assert!(!EngineSignal::Progress(1.0).is_terminal());
    }
}
