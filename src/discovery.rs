#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Finds one file per student in a directory or archive of hand-ins.
//!
//! Moodle downloads look like
//! `Ana Pérez_123456_assignsubmission_file_Ensayo.docx`; the logical identity
//! is the part before the Moodle suffix. When a student handed in several
//! formats the richest one wins.

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fmt::Display,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail, ensure};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled, settings::Style};
use tracing::{debug, info, warn};

use crate::{
    constants::{MOODLE_SUFFIX, NUMERIC_ID_SUFFIX},
    process::run_collect,
    util::{find_files, tool_path},
};

/// Formats accepted as submissions, declared from highest to lowest fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML document.
    Docx,
    /// Legacy Word document.
    Doc,
    /// Plain text.
    Txt,
    /// Markdown.
    Md,
}

impl SubmissionFormat {
    /// Recognizes a supported extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            "txt" => Some(Self::Txt),
            "md" => Some(Self::Md),
            _ => None,
        }
    }

    /// Lowercase extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Txt => "txt",
            Self::Md => "md",
        }
    }
}

impl Display for SubmissionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// One student's selected hand-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Logical student identity.
    pub identity: String,
    /// Selected file.
    pub path:     PathBuf,
    /// Format of the selected file.
    pub format:   SubmissionFormat,
}

impl Submission {
    /// File name of the selected file.
    pub fn source_file(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A student whose best format appears more than once, so no file can be
/// chosen without guessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousSubmission {
    /// Logical student identity.
    pub identity:   String,
    /// The contested format.
    pub format:     SubmissionFormat,
    /// Every file of that format for this student.
    pub candidates: Vec<PathBuf>,
}

/// Result of scanning an input set.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Selected submissions, ordered by identity.
    pub submissions: Vec<Submission>,
    /// Students that could not be resolved to one file.
    pub ambiguous:   Vec<AmbiguousSubmission>,
    /// Files skipped for having an unsupported extension.
    pub ignored:     Vec<PathBuf>,
}

/// Row shown by `gradeflow discover`.
#[derive(Tabled)]
struct DiscoveryRow {
    #[tabled(rename = "Student")]
    /// Logical identity.
    identity: String,
    #[tabled(rename = "Format")]
    /// Selected format, or `ambiguous`.
    format:   String,
    #[tabled(rename = "File(s)")]
    /// File names involved.
    files:    String,
}

impl DiscoveryReport {
    /// Renders submissions and ambiguities as one table.
    pub fn table(&self) -> String {
        let file_name = |p: &PathBuf| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let rows = self
            .submissions
            .iter()
            .map(|s| DiscoveryRow {
                identity: s.identity.clone(),
                format:   s.format.to_string(),
                files:    s.source_file(),
            })
            .chain(self.ambiguous.iter().map(|a| DiscoveryRow {
                identity: a.identity.clone(),
                format:   format!("ambiguous ({})", a.format),
                files:    a.candidates.iter().map(file_name).join("\n"),
            }));
        Table::new(rows).with(Style::modern()).to_string()
    }
}

/// Derives the logical student identity from a file stem by removing the
/// Moodle submission suffix (or a bare numeric-id suffix).
pub fn student_identity(stem: &str) -> String {
    let cut = MOODLE_SUFFIX
        .find(stem)
        .or_else(|| NUMERIC_ID_SUFFIX.find(stem))
        .map(|m| m.start())
        .unwrap_or(stem.len());
    let identity = stem[..cut].trim_matches(|c: char| c == '_' || c.is_whitespace());
    if identity.is_empty() {
        stem.trim().to_string()
    } else {
        identity.to_string()
    }
}

/// Derives the first name used to address a student from their identity.
///
/// `ANA MARÍA PÉREZ` → `Ana`; `perez_ana_ensayo` → `Ana` (lastname first, the
/// common manual naming scheme); `ana` → `Ana`.
pub fn first_name(identity: &str) -> String {
    let parts: Vec<&str> = identity.split('_').map(str::trim).collect();
    let first_part = parts.first().copied().unwrap_or_default();

    let chosen = if first_part.contains(char::is_whitespace) {
        first_part.split_whitespace().next().unwrap_or(first_part)
    } else if parts.len() >= 2 && !parts[1].is_empty() {
        parts[1]
    } else {
        first_part
    };

    let mut chars = chosen.chars();
    match chars.next() {
        Some(head) => head.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => identity.to_string(),
    }
}

/// Scans a directory (non-recursively) and selects one file per student.
pub fn discover_dir(dir: &Path) -> Result<DiscoveryReport> {
    ensure!(dir.is_dir(), "Not a directory: {}", dir.display());

    let mut report = DiscoveryReport::default();
    // Keyed by lowercase identity so `Ana.pdf` and `ana.docx` group together;
    // the first spelling seen in path order is kept for display.
    let mut groups: BTreeMap<String, (String, Vec<(SubmissionFormat, PathBuf)>)> = BTreeMap::new();

    for path in find_files(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let Some(format) = SubmissionFormat::from_path(&path) else {
            debug!("Ignoring unsupported file {name}");
            report.ignored.push(path.clone());
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let identity = student_identity(stem);
        groups
            .entry(identity.to_lowercase())
            .or_insert_with(|| (identity, Vec::new()))
            .1
            .push((format, path.clone()));
    }

    for (_, (identity, mut files)) in groups {
        files.sort();
        let best = files[0].0;
        let candidates: Vec<PathBuf> = files
            .iter()
            .filter(|(format, _)| *format == best)
            .map(|(_, path)| path.clone())
            .collect();

        if candidates.len() > 1 {
            warn!(
                "{identity}: {} {} files found, refusing to pick one",
                candidates.len(),
                best
            );
            report.ambiguous.push(AmbiguousSubmission {
                identity,
                format: best,
                candidates,
            });
            continue;
        }

        if files.len() > 1 {
            debug!("{identity}: selected {best} over {} other file(s)", files.len() - 1);
        }
        report.submissions.push(Submission {
            identity,
            path: candidates[0].clone(),
            format: best,
        });
    }

    info!(
        "Discovered {} submission(s), {} ambiguous, {} ignored in {}",
        report.submissions.len(),
        report.ambiguous.len(),
        report.ignored.len(),
        dir.display()
    );
    Ok(report)
}

/// Unpacks a `.zip` next to itself, into a directory named after its stem.
pub async fn unpack_archive(archive: &Path, deadline: Duration) -> Result<PathBuf> {
    let stem = archive
        .file_stem()
        .context("Archive path has no file name")?;
    let dest = archive
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(stem);
    std::fs::create_dir_all(&dest)
        .with_context(|| format!("Could not create {}", dest.display()))?;

    let unzip = tool_path("unzip")?;
    let args: Vec<OsString> = vec![
        "-o".into(),
        "-qq".into(),
        archive.as_os_str().to_owned(),
        "-d".into(),
        dest.as_os_str().to_owned(),
    ];
    let out = run_collect(unzip, &args, None, Some(deadline)).await?;
    if !out.succeeded() {
        bail!("Could not unpack {}: {}", archive.display(), out.stderr_text());
    }

    info!("Unpacked {} into {}", archive.display(), dest.display());
    Ok(dest)
}

/// Discovers submissions in a directory or a `.zip` archive.
pub async fn discover(input: &Path, tool_timeout: Duration) -> Result<DiscoveryReport> {
    if input.is_file() {
        let is_zip = input
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        ensure!(is_zip, "Input must be a directory or a .zip archive: {}", input.display());
        let dir = unpack_archive(input, tool_timeout).await?;
        return discover_dir(&dir);
    }
    discover_dir(input)
}
