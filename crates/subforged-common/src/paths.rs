//! Path utilities for artifact references and uploaded file names.
//!
//! Artifact references are relative names inside a single storage root. Every
//! reference handed back to a caller goes through [`resolve_within_root`]
//! before a byte is served, so traversal segments, absolute paths and symlinks
//! pointing elsewhere are rejected regardless of where the reference came from.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Longest sanitized file name we keep, in bytes.
const MAX_FILE_NAME_LEN: usize = 100;

/// Resolve `reference` to a path strictly inside `root`.
///
/// The reference is normalized lexically first: `.` segments are dropped,
/// while `..`, root and prefix components are rejected outright. When the
/// resulting path exists it is canonicalized and must still lie under the
/// canonical root, which catches symlinks that escape the storage area.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use subforged_common::paths::resolve_within_root;
///
/// let root = Path::new("/srv/output");
/// assert_eq!(
///     resolve_within_root(root, "./movie.srt").unwrap(),
///     Path::new("/srv/output/movie.srt"),
/// );
/// assert!(resolve_within_root(root, "../../etc/passwd").is_err());
/// assert!(resolve_within_root(root, "/etc/passwd").is_err());
/// ```
pub fn resolve_within_root(root: &Path, reference: &str) -> Result<PathBuf> {
    if reference.is_empty() || reference.contains('\0') || reference.contains('\\') {
        return Err(Error::PathTraversal(reference.to_string()));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(reference).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathTraversal(reference.to_string()));
            }
        }
    }

    // The root itself is not an artifact.
    if normalized.as_os_str().is_empty() {
        return Err(Error::PathTraversal(reference.to_string()));
    }

    let joined = root.join(&normalized);

    if joined.symlink_metadata().is_ok() {
        let canonical_root = root.canonicalize()?;
        let canonical = joined
            .canonicalize()
            .map_err(|_| Error::PathTraversal(reference.to_string()))?;
        if !canonical.starts_with(&canonical_root) || canonical == canonical_root {
            return Err(Error::PathTraversal(reference.to_string()));
        }
        return Ok(canonical);
    }

    Ok(joined)
}

/// Reduce an uploaded file name to a single safe path component.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
/// Directory parts are discarded and leading dots stripped, so the result can
/// never be hidden or climb out of a directory.
///
/// ```
/// use subforged_common::paths::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("My Movie (2020).mp4"), "My_Movie__2020_.mp4");
/// assert_eq!(sanitize_file_name("../../evil.mp4"), "evil.mp4");
/// assert_eq!(sanitize_file_name(""), "upload");
/// ```
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    let mut out: String = trimmed.chars().take(MAX_FILE_NAME_LEN).collect();
    if out.is_empty() {
        out.push_str("upload");
    }
    out
}

/// Return the lowercase MIME essence of a declared content type.
///
/// ```
/// use subforged_common::paths::content_type_essence;
///
/// assert_eq!(content_type_essence("Video/MP4; codecs=\"avc1\""), "video/mp4");
/// ```
pub fn content_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
