#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Text extraction. Decoding is a capability behind [`DocumentDecoder`]; the
//! extractor only normalizes and classifies what a decoder hands back, so it
//! never branches on encodings itself.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    constants::BLANK_LINE_RUN,
    discovery::{Submission, SubmissionFormat},
    process::run_collect,
    util::first_available,
};

/// How faithfully bytes were turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeQuality {
    /// Valid UTF-8.
    Exact,
    /// Decoded with a fallback encoding from the ladder.
    Fallback(&'static str),
    /// Invalid sequences were replaced with U+FFFD.
    Lossy,
}

/// Text produced by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Decoded, not yet normalized, text.
    pub text:    String,
    /// Which rung of the ladder produced it.
    pub quality: DecodeQuality,
}

/// Why a decoder could not produce text at all.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// None of the tools able to decode this format is installed.
    #[error("no tool to decode .{format} files is installed (tried {tried})")]
    ToolMissing {
        /// The format being decoded.
        format: SubmissionFormat,
        /// Comma-separated tool names.
        tried:  String,
    },
    /// A tool ran and failed.
    #[error("{tool} could not decode {path}: {detail}")]
    ToolFailed {
        /// Tool name.
        tool:   String,
        /// File being decoded.
        path:   PathBuf,
        /// Stderr or spawn error.
        detail: String,
    },
    /// The file itself could not be read.
    #[error("could not read {path}: {source}")]
    Io {
        /// File being read.
        path:   PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Best-effort decoding of one submission file into text. Implementations
/// must not fail on malformed content; they fall back down an encoding ladder
/// instead and report the rung used.
pub trait DocumentDecoder {
    /// Decodes the selected file of `submission`.
    async fn decode(&self, submission: &Submission) -> Result<DecodeOutcome, ExtractionError>;
}

/// Windows-1252 code points for bytes 0x80..=0x9F. Bytes the code page leaves
/// undefined map to the matching C1 control, as Latin-1 does.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Decodes a single Windows-1252 byte.
fn cp1252_char(byte: u8) -> char {
    match byte {
        0x80..=0x9F => CP1252_HIGH[usize::from(byte - 0x80)],
        _ => char::from(byte),
    }
}

/// Control characters that never appear in prose; seeing them after a
/// single-byte decode means the bytes were not text in that encoding.
fn is_binary_noise(c: char) -> bool {
    c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{000C}')
}

/// The encoding ladder: UTF-8, UTF-8 with BOM, Windows-1252/Latin-1, then
/// lossy UTF-8. Never fails.
pub fn decode_bytes(bytes: &[u8]) -> DecodeOutcome {
    const BOM: &[u8] = b"\xEF\xBB\xBF";

    if let Some(rest) = bytes.strip_prefix(BOM)
        && let Ok(text) = std::str::from_utf8(rest)
    {
        return DecodeOutcome {
            text:    text.to_string(),
            quality: DecodeQuality::Fallback("utf-8-sig"),
        };
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodeOutcome {
            text:    text.to_string(),
            quality: DecodeQuality::Exact,
        };
    }

    let single_byte: String = bytes.iter().copied().map(cp1252_char).collect();
    if !single_byte.chars().any(is_binary_noise) {
        return DecodeOutcome {
            text:    single_byte,
            quality: DecodeQuality::Fallback("windows-1252"),
        };
    }

    DecodeOutcome {
        text:    String::from_utf8_lossy(bytes).into_owned(),
        quality: DecodeQuality::Lossy,
    }
}

/// Reads `.txt`/`.md` files through the encoding ladder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextDecoder;

impl PlainTextDecoder {
    /// Reads and decodes `path`.
    pub async fn read(&self, path: &Path) -> Result<DecodeOutcome, ExtractionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ExtractionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(decode_bytes(&bytes))
    }
}

/// Decodes office and PDF formats by shelling out to converters that print
/// plain text on stdout.
#[derive(Debug, Clone, Copy)]
pub struct CommandDecoder {
    /// Per-tool deadline.
    deadline: Duration,
}

impl CommandDecoder {
    /// Creates a decoder whose tools are killed after `deadline`.
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Converters for `format`, in preference order, with their arguments.
    fn tools(format: SubmissionFormat, path: &Path) -> Vec<(&'static str, Vec<OsString>)> {
        let file = path.as_os_str().to_owned();
        match format {
            SubmissionFormat::Pdf => {
                vec![("pdftotext", vec!["-layout".into(), "-enc".into(), "UTF-8".into(), file, "-".into()])]
            }
            SubmissionFormat::Docx => vec![
                ("pandoc", vec!["-t".into(), "plain".into(), "--wrap=none".into(), file.clone()]),
                ("docx2txt", vec![file, "-".into()]),
            ],
            SubmissionFormat::Doc => vec![
                ("antiword", vec![file.clone()]),
                ("catdoc", vec![file]),
            ],
            SubmissionFormat::Txt | SubmissionFormat::Md => Vec::new(),
        }
    }

    /// Runs the first installed converter that succeeds.
    pub async fn run(
        &self,
        format: SubmissionFormat,
        path: &Path,
    ) -> Result<DecodeOutcome, ExtractionError> {
        let tools = Self::tools(format, path);
        let names: Vec<&str> = tools.iter().map(|(name, _)| *name).collect();
        let mut last_failure = None;

        for (name, args) in tools {
            let Some((_, program)) = first_available(&[name]) else {
                debug!("{name} not installed");
                continue;
            };
            match run_collect(&program, &args, None, Some(self.deadline)).await {
                Ok(out) if out.succeeded() => {
                    debug!("Decoded {} with {name}", path.display());
                    return Ok(decode_bytes(&out.stdout));
                }
                Ok(out) => {
                    warn!("{name} failed on {}: {}", path.display(), out.stderr_text());
                    last_failure = Some(ExtractionError::ToolFailed {
                        tool:   name.to_string(),
                        path:   path.to_path_buf(),
                        detail: out.stderr_text(),
                    });
                }
                Err(e) => {
                    warn!("{name} could not run on {}: {e:#}", path.display());
                    last_failure = Some(ExtractionError::ToolFailed {
                        tool:   name.to_string(),
                        path:   path.to_path_buf(),
                        detail: format!("{e:#}"),
                    });
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| ExtractionError::ToolMissing {
            format,
            tried: names.iter().join(", "),
        }))
    }
}

/// The default decoder: plain text through the ladder, everything else
/// through external converters.
#[derive(Debug, Clone, Copy)]
pub struct StandardDecoder {
    /// Plain-text strategy.
    plain:   PlainTextDecoder,
    /// Converter strategy.
    command: CommandDecoder,
}

impl StandardDecoder {
    /// Creates the default decoder with a per-tool deadline.
    pub fn new(tool_deadline: Duration) -> Self {
        Self {
            plain:   PlainTextDecoder,
            command: CommandDecoder::new(tool_deadline),
        }
    }
}

impl DocumentDecoder for StandardDecoder {
    async fn decode(&self, submission: &Submission) -> Result<DecodeOutcome, ExtractionError> {
        match submission.format {
            SubmissionFormat::Txt | SubmissionFormat::Md => self.plain.read(&submission.path).await,
            format => self.command.run(format, &submission.path).await,
        }
    }
}

/// Outcome class of an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    /// Text was extracted.
    Ok,
    /// The file decoded to nothing.
    Empty,
    /// The decoder reported an error.
    Failed,
}

/// A submission's text, ready for evaluation when `status` is `Ok`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Submission identity.
    pub identity: String,
    /// Normalized text; empty unless `status` is `Ok`.
    pub text:     String,
    /// Outcome class.
    pub status:   ExtractionStatus,
    /// Decoder quality when decoding succeeded.
    pub quality:  Option<DecodeQuality>,
    /// Error detail when `status` is `Failed`.
    pub detail:   Option<String>,
}

impl ExtractedDocument {
    /// The text when extraction succeeded, otherwise a human-readable reason.
    pub fn usable_text(&self) -> Result<&str, String> {
        match self.status {
            ExtractionStatus::Ok => Ok(&self.text),
            ExtractionStatus::Empty => Err("extraction produced no text (empty document)".into()),
            ExtractionStatus::Failed => Err(format!(
                "extraction failed: {}",
                self.detail.as_deref().unwrap_or("unknown error")
            )),
        }
    }
}

/// Normalizes extracted text: unify line endings, collapse whitespace runs
/// inside lines while keeping indentation, squeeze 3+ newlines to 2, trim.
pub fn normalize_text(text: &str) -> String {
    let unified = text
        .trim_start_matches('\u{FEFF}')
        .replace("\r\n", "\n")
        .replace('\r', "\n");

    let joined = unified
        .split('\n')
        .map(|line| {
            let content = line.split_whitespace().join(" ");
            if content.is_empty() {
                return String::new();
            }
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            indent + &content
        })
        .join("\n");

    BLANK_LINE_RUN
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// Turns submissions into [`ExtractedDocument`]s using a decoding strategy.
#[derive(Debug, Clone)]
pub struct TextExtractor<D> {
    /// Decoding strategy.
    decoder: D,
}

impl<D: DocumentDecoder> TextExtractor<D> {
    /// Creates an extractor over `decoder`.
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    /// Extracts and classifies one submission. Never fails: decoder errors
    /// become a `Failed` document.
    pub async fn extract(&self, submission: &Submission) -> ExtractedDocument {
        match self.decoder.decode(submission).await {
            Ok(outcome) => {
                if outcome.quality != DecodeQuality::Exact {
                    debug!("{}: decoded with {:?}", submission.identity, outcome.quality);
                }
                let text = normalize_text(&outcome.text);
                let status = if text.is_empty() {
                    ExtractionStatus::Empty
                } else {
                    ExtractionStatus::Ok
                };
                ExtractedDocument {
                    identity: submission.identity.clone(),
                    text,
                    status,
                    quality: Some(outcome.quality),
                    detail: None,
                }
            }
            Err(e) => ExtractedDocument {
                identity: submission.identity.clone(),
                text:     String::new(),
                status:   ExtractionStatus::Failed,
                quality:  None,
                detail:   Some(e.to_string()),
            },
        }
    }
}
