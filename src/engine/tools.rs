//! External tool detection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use subforged_common::{Error, Result};

use crate::config::ToolsConfig;

/// Availability information for a tool, returned by [`check_tools`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of `-version` output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Locate the ffmpeg binary.
///
/// A configured path is used when it exists; otherwise ffmpeg is looked up in
/// `PATH` with [`which::which`].
pub fn resolve_ffmpeg(tools: &ToolsConfig) -> Result<PathBuf> {
    if let Some(ref custom) = tools.ffmpeg_path {
        if custom.exists() {
            return Ok(custom.clone());
        }
        tracing::warn!(
            "Configured ffmpeg path {:?} does not exist, falling back to PATH",
            custom
        );
    }

    which::which("ffmpeg").map_err(|_| {
        Error::tool("ffmpeg", "ffmpeg not found; is it installed and in PATH?")
    })
}

/// Check the external tools the engine depends on.
pub fn check_tools(tools: &ToolsConfig) -> Vec<ToolInfo> {
    match resolve_ffmpeg(tools) {
        Ok(path) => vec![ToolInfo {
            name: "ffmpeg".to_string(),
            available: true,
            version: detect_version(&path),
            path: Some(path),
        }],
        Err(_) => vec![ToolInfo {
            name: "ffmpeg".to_string(),
            available: false,
            version: None,
            path: None,
        }],
    }
}

/// Run `ffmpeg -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
}
