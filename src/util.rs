#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use glob::{Pattern, glob};
use which::which;

use crate::constants::{UNSAFE_PATH_CHARS, WHITESPACE_RUN};

/// Finds and returns the path to an external tool
pub fn tool_path(name: &str) -> Result<OsString> {
    which(name)
        .map(PathBuf::into_os_string)
        .with_context(|| format!("Cannot find `{name}` on PATH"))
}

/// Returns the first of `candidates` present on PATH, with its location.
pub fn first_available<'a>(candidates: &[&'a str]) -> Option<(&'a str, PathBuf)> {
    candidates
        .iter()
        .find_map(|name| which(name).ok().map(|path| (*name, path)))
}

/// Lists regular files directly inside `root_dir` (no recursion), sorted by
/// path.
///
/// * `root_dir`: the directory to list
pub fn find_files(root_dir: &Path) -> Result<Vec<PathBuf>> {
    let root = root_dir
        .to_str()
        .context("Could not convert root_dir to string")?;
    let pattern = Path::new(&Pattern::escape(root))
        .join("*")
        .to_string_lossy()
        .into_owned();

    let mut files: Vec<PathBuf> = glob(&pattern)
        .context("Could not create glob")?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Makes `name` safe to use as a single path segment.
pub fn sanitize_segment(name: &str) -> String {
    let replaced = UNSAFE_PATH_CHARS.replace_all(name, "_");
    let replaced = WHITESPACE_RUN.replace_all(&replaced, "_");
    let trimmed = replaced.trim_matches('.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Truncates `text` to at most `limit` characters on a char boundary.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
