//! Path guard applied before any external command runs.

use std::path::Path;

use crate::error::{Error, Result};

/// Substrings that are never allowed in a measured path.
pub const FORBIDDEN_PATTERNS: [&str; 5] = ["..", "~", "*", "?", "["];

/// Check that `path` is safe to hand to a shell tool: no traversal or glob
/// patterns, absolute, and existing.
pub async fn validate_path(path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if let Some(pattern) = FORBIDDEN_PATTERNS.iter().find(|p| text.contains(*p)) {
        return Err(invalid(path, format!("contains forbidden pattern '{pattern}'")));
    }
    if !path.is_absolute() {
        return Err(invalid(path, "not absolute".to_string()));
    }
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(invalid(path, "does not exist".to_string())),
        Err(e) => Err(invalid(path, format!("cannot stat: {e}"))),
    }
}

fn invalid(path: &Path, reason: String) -> Error {
    Error::Validation {
        path: path.to_path_buf(),
        reason,
    }
}
