//! Header path handling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::AnatomistError;

/// Canonical UTF-8 form of a header path, forward slashes only.
///
/// `dunce` keeps Windows paths free of the `\\?\` prefix so they stay
/// usable in `-I` flags and `#include` lines.
///
/// # Errors
/// `IoError` if the path does not exist; `ParseFailure` for non-UTF-8 paths.
pub fn normalize_path(path: &Path) -> Result<String, AnatomistError> {
    let canonical = dunce::canonicalize(path)?;
    let s = canonical
        .to_str()
        .ok_or_else(|| AnatomistError::ParseFailure(format!("Non-UTF-8 path: {}", canonical.display())))?;
    Ok(s.replace('\\', "/"))
}

/// Canonicalizes and de-duplicates headers, keeping first-seen order.
pub fn unique_headers(paths: &[PathBuf]) -> Result<Vec<PathBuf>, AnatomistError> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(paths.len());
    for path in paths {
        let normalized = normalize_path(path)?;
        if seen.insert(normalized.clone()) {
            unique.push(PathBuf::from(normalized));
        }
    }
    Ok(unique)
}

/// `-I<dir>` for each distinct parent directory, in order.
pub fn include_flags(headers: &[PathBuf]) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .filter_map(|h| h.parent())
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| format!("-I{}", dir.display()))
        .filter(|flag| seen.insert(flag.clone()))
        .collect()
}
