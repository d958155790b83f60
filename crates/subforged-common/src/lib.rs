//! Subforged-Common: Shared types, errors, and utilities.
//!
//! This crate provides common functionality used across subforged:
//!
//! - **Typed IDs**: A UUID wrapper identifying conversion jobs
//! - **Error Handling**: The job-orchestration error taxonomy and result alias
//! - **Path Utilities**: Artifact path-safety checks and upload name handling
//!
//! # Examples
//!
//! ```
//! use subforged_common::{JobId, Error, Result};
//! use subforged_common::paths::resolve_within_root;
//! use std::path::Path;
//!
//! let job_id = JobId::new();
//! assert_eq!(job_id.to_string().len(), 36);
//!
//! // Traversal outside the output root is rejected
//! assert!(resolve_within_root(Path::new("/srv/output"), "../../etc/passwd").is_err());
//!
//! fn lookup(id: JobId) -> Result<()> {
//!     Err(Error::not_found("job", id))
//! }
//! assert_eq!(lookup(job_id).unwrap_err().http_status(), 404);
//! ```

pub mod error;
pub mod ids;
pub mod paths;

pub use error::{Error, Result};
pub use ids::JobId;
