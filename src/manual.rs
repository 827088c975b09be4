#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Tutor-entered scores for the manual criteria of a hybrid run.

use std::{
    ffi::OsString,
    io::{BufRead, Write},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    constants::PDF_VIEWERS,
    discovery::{Submission, SubmissionFormat},
    process::{run_collect, run_until_exit},
    reconcile::CriterionScore,
    rubric::RubricCriterion,
    util::first_available,
};

/// Why manual scores could not be collected.
#[derive(Debug, Error)]
pub enum ManualInputError {
    /// Input ended before every criterion was scored.
    #[error("manual-input-aborted: input ended while scoring `{criterion}`")]
    Aborted {
        /// Criterion being scored.
        criterion: String,
    },
    /// The terminal could not be read or written.
    #[error("manual input failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Somewhere manual scores come from.
pub trait ScoreSource {
    /// Returns one explicit score per criterion in `criteria`, in order.
    async fn collect(
        &mut self,
        submission: &Submission,
        criteria: &[RubricCriterion],
    ) -> Result<Vec<CriterionScore>, ManualInputError>;
}

/// Prompts on `output` and reads answers from an input stream, one line each.
///
/// Lines are read on a dedicated thread, so a pending answer never blocks the
/// runtime and dropping the `collect` future abandons the wait.
pub struct TerminalScoreSource<W> {
    /// Lines from the reader thread; `Ok(None)` marks end of input.
    lines:  mpsc::Receiver<std::io::Result<Option<String>>>,
    /// Where prompts are written.
    output: W,
}

impl<W: Write> TerminalScoreSource<W> {
    /// Creates a source reading `input` on its own thread.
    pub fn new<R>(input: R, output: W) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, lines) = mpsc::channel(1);
        // Not `spawn_blocking`: runtime shutdown would wait on a parked read.
        thread::spawn(move || {
            let mut input = input;
            loop {
                let mut line = String::new();
                let read = input.read_line(&mut line).map(|n| (n > 0).then_some(line));
                let finished = !matches!(read, Ok(Some(_)));
                if tx.blocking_send(read).is_err() || finished {
                    break;
                }
            }
        });
        Self { lines, output }
    }

    /// Reads one line; `None` at end of input.
    async fn read_line(&mut self) -> Result<Option<String>, ManualInputError> {
        match self.lines.recv().await {
            Some(Ok(Some(line))) => Ok(Some(line.trim().to_string())),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(None)) | None => Ok(None),
        }
    }

    /// Asks for a score until a number within `0..=maximum` is entered.
    async fn ask_score(&mut self, criterion: &RubricCriterion) -> Result<f64, ManualInputError> {
        loop {
            write!(self.output, "Puntaje (0-{}): ", criterion.maximum)?;
            self.output.flush()?;

            let Some(answer) = self.read_line().await? else {
                return Err(ManualInputError::Aborted {
                    criterion: criterion.name.clone(),
                });
            };
            if answer.is_empty() {
                writeln!(self.output, "{}", "Ingresa un número.".yellow())?;
                continue;
            }
            match answer.replace(',', ".").parse::<f64>() {
                Ok(score) if score.is_finite() && (0.0..=criterion.maximum).contains(&score) => {
                    return Ok(score);
                }
                Ok(_) => writeln!(
                    self.output,
                    "{}",
                    format!("El puntaje debe estar entre 0 y {}.", criterion.maximum).yellow()
                )?,
                Err(_) => writeln!(self.output, "{}", "Eso no es un número.".yellow())?,
            }
        }
    }
}

impl<W: Write> ScoreSource for TerminalScoreSource<W> {
    async fn collect(
        &mut self,
        submission: &Submission,
        criteria: &[RubricCriterion],
    ) -> Result<Vec<CriterionScore>, ManualInputError> {
        writeln!(
            self.output,
            "\n{} {}",
            "Evaluación manual:".bold(),
            submission.identity.cyan()
        )?;

        let mut scores = Vec::with_capacity(criteria.len());
        for criterion in criteria {
            writeln!(
                self.output,
                "\n{} (máximo {})",
                criterion.name.bold(),
                criterion.maximum
            )?;
            for level in &criterion.levels {
                writeln!(self.output, "  {:>6}  {}", level.score, level.description)?;
            }

            let score = self.ask_score(criterion).await?;

            write!(self.output, "Comentario (opcional): ")?;
            self.output.flush()?;
            let Some(comment) = self.read_line().await? else {
                return Err(ManualInputError::Aborted {
                    criterion: criterion.name.clone(),
                });
            };

            scores.push(CriterionScore::new(&criterion.name, score, comment));
        }
        Ok(scores)
    }
}

/// Opens a submission for the tutor, converting it to PDF first when needed.
#[derive(Debug, Clone)]
pub struct ReviewViewer {
    /// Deadline for the conversion tools.
    deadline: Duration,
    /// Where converted PDFs are written.
    workdir:  PathBuf,
}

impl ReviewViewer {
    /// Creates a viewer that converts into `workdir`.
    pub fn new(deadline: Duration, workdir: PathBuf) -> Self {
        Self { deadline, workdir }
    }

    /// Shows `submission` and waits for the viewer to close. Failures are
    /// logged and otherwise ignored.
    pub async fn show(&self, submission: &Submission) {
        if let Err(e) = self.try_show(submission).await {
            warn!("Could not open {} for review: {e:#}", submission.path.display());
        }
    }

    /// Fallible body of [`ReviewViewer::show`].
    async fn try_show(&self, submission: &Submission) -> Result<()> {
        let pdf = match submission.format {
            SubmissionFormat::Pdf => submission.path.clone(),
            _ => self.convert(&submission.path).await?,
        };

        let Some((name, viewer)) = first_available(&PDF_VIEWERS) else {
            bail!("no PDF viewer installed (tried {})", PDF_VIEWERS.join(", "));
        };
        info!("Opening {} with {name}; close it to continue", pdf.display());
        let status = run_until_exit(viewer, &[pdf.into_os_string()]).await?;
        if !status.success() {
            warn!("{name} exited with {status}");
        }
        Ok(())
    }

    /// Where the converted PDF of `path` lands. Dots inside the stem are kept.
    pub fn pdf_target(&self, path: &Path) -> Result<PathBuf> {
        let stem = path.file_stem().context("Submission has no file name")?;
        Ok(self.workdir.join(format!("{}.pdf", stem.to_string_lossy())))
    }

    /// Converts `path` to PDF with LibreOffice, falling back to unoconv.
    async fn convert(&self, path: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.workdir)
            .with_context(|| format!("Could not create {}", self.workdir.display()))?;
        let target = self.pdf_target(path)?;

        if let Some((name, office)) = first_available(&["libreoffice", "soffice"]) {
            let args: Vec<OsString> = vec![
                "--headless".into(),
                "--convert-to".into(),
                "pdf".into(),
                "--outdir".into(),
                self.workdir.as_os_str().to_owned(),
                path.as_os_str().to_owned(),
            ];
            match run_collect(office, &args, None, Some(self.deadline)).await {
                Ok(out) if out.succeeded() && target.exists() => return Ok(target),
                Ok(out) => debug!("{name} could not convert: {}", out.stderr_text()),
                Err(e) => debug!("{name} could not run: {e:#}"),
            }
        }

        if let Some((_, unoconv)) = first_available(&["unoconv"]) {
            let args: Vec<OsString> = vec![
                "-f".into(),
                "pdf".into(),
                "-o".into(),
                target.as_os_str().to_owned(),
                path.as_os_str().to_owned(),
            ];
            let out = run_collect(unoconv, &args, None, Some(self.deadline)).await?;
            if out.succeeded() && target.exists() {
                return Ok(target);
            }
            bail!("unoconv could not convert {}: {}", path.display(), out.stderr_text());
        }

        bail!("no converter produced a PDF for {}", path.display())
    }
}
