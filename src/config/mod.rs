mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./subforged.toml",
        "~/.config/subforged/config.toml",
        "/etc/subforged/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Apply `PORT` and `FFMPEG_PATH` from the environment on top of the file.
fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(port) = lookup("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("PORT is not a valid port number: {port:?}"))?;
    }

    if let Some(ffmpeg) = lookup("FFMPEG_PATH") {
        if !ffmpeg.trim().is_empty() {
            config.tools.ffmpeg_path = Some(PathBuf::from(shellexpand::tilde(ffmpeg.trim()).as_ref()));
        }
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.upload.allowed_content_types.is_empty() {
        anyhow::bail!("At least one allowed upload content type is required");
    }

    if config.upload.max_upload_bytes == 0 {
        anyhow::bail!("upload.max_upload_bytes must be greater than 0");
    }

    if config.storage.upload_dir == config.storage.output_dir {
        anyhow::bail!(
            "storage.upload_dir and storage.output_dir must differ (both {:?})",
            config.storage.upload_dir
        );
    }

    if config.conversion.output_extension.is_empty()
        || !config
            .conversion
            .output_extension
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
    {
        anyhow::bail!(
            "conversion.output_extension must be alphanumeric, got {:?}",
            config.conversion.output_extension
        );
    }

    if let Some(ref ffmpeg) = config.tools.ffmpeg_path {
        if !ffmpeg.exists() {
            tracing::warn!("Configured ffmpeg path does not exist: {:?}", ffmpeg);
        }
    }

    Ok(())
}
