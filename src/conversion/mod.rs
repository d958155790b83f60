//! Conversion job orchestration.
//!
//! [`JobOrchestrator`] is the entry point used by the transport layer: it
//! validates uploads, stores them, registers a job and hands it to the
//! [`TranscodeRunner`], which turns engine signals into job transitions and
//! makes sure every job ends up `Completed` or `Failed`.

mod orchestrator;
mod runner;

pub use orchestrator::{JobOrchestrator, JobStatus, OrchestratorSettings, ResolvedArtifact, Upload};
pub use runner::TranscodeRunner;
