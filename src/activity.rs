#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rubric::{Rubric, load_rubric};

/// What kind of artifact an activity collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// A document handed in as a file.
    #[default]
    #[serde(alias = "escrito")]
    Written,
    /// A forum participation.
    #[serde(alias = "foro")]
    Forum,
}

/// One gradable activity as declared in a course document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityConfig {
    /// Identifier within its unit, e.g. `1.3`.
    pub id:           String,
    /// Human-readable title.
    #[serde(alias = "titulo", default)]
    pub title:        String,
    /// Artifact kind.
    #[serde(alias = "tipo", default)]
    pub kind:         ActivityKind,
    /// Whether the activity is meant to be graded from extracted text.
    #[serde(alias = "extraer_texto", default)]
    pub extract_text: bool,
    /// Rubric path, relative to the course document.
    #[serde(alias = "rubrica")]
    pub rubric_ref:   PathBuf,
    /// Prompt template path, relative to the course document.
    #[serde(alias = "prompt")]
    pub prompt_ref:   PathBuf,
    /// Assignment instructions shown to students.
    #[serde(alias = "instrucciones", default)]
    pub instructions: String,
}

/// A unit groups activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Unit number.
    #[serde(alias = "unidad")]
    pub unit:       u32,
    /// Activities in this unit.
    #[serde(alias = "actividades", default)]
    pub activities: Vec<ActivityConfig>,
}

/// A course document listing units and their activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseDocument {
    /// Short course code used in output paths, e.g. `FI08`.
    #[serde(alias = "codigo")]
    pub code:  String,
    /// Display name.
    #[serde(alias = "nombre", default)]
    pub name:  String,
    /// Units in order.
    #[serde(alias = "unidades", default)]
    pub units: Vec<Unit>,
}

impl CourseDocument {
    /// Finds the activity `id` in unit `unit`.
    pub fn find_activity(&self, unit: u32, id: &str) -> Option<&ActivityConfig> {
        self.units
            .iter()
            .filter(|u| u.unit == unit)
            .flat_map(|u| u.activities.iter())
            .find(|a| a.id == id)
    }
}

/// Reads a course document.
pub fn load_course(path: &Path) -> Result<CourseDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read course document {}", path.display()))?;
    let course: CourseDocument = serde_json::from_str(&text)
        .with_context(|| format!("Invalid course document {}", path.display()))?;
    ensure!(!course.code.trim().is_empty(), "Course document {} has no code", path.display());
    Ok(course)
}

/// Everything a batch needs to know about the activity being graded, with
/// its rubric and prompt already loaded. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResolvedActivity {
    /// Course code.
    pub course:          String,
    /// Unit number.
    pub unit:            u32,
    /// The activity declaration.
    pub config:          ActivityConfig,
    /// Loaded and validated rubric.
    pub rubric:          Rubric,
    /// File name of the rubric, recorded in every feedback record.
    pub rubric_ref:      String,
    /// Prompt template text.
    pub prompt_template: String,
}

impl ResolvedActivity {
    /// Loads the course document, locates the activity and reads its rubric
    /// and prompt. Any failure here is fatal to the batch.
    pub fn resolve(course_path: &Path, unit: u32, activity_id: &str) -> Result<Self> {
        let course = load_course(course_path)?;
        let Some(config) = course.find_activity(unit, activity_id).cloned() else {
            bail!("Activity {activity_id} not found in unit {unit} of course {}", course.code);
        };

        let base = course_path.parent().unwrap_or_else(|| Path::new("."));
        let rubric_path = base.join(&config.rubric_ref);
        let prompt_path = base.join(&config.prompt_ref);

        let rubric = load_rubric(&rubric_path)?;
        let prompt_template = std::fs::read_to_string(&prompt_path)
            .with_context(|| format!("Could not read prompt template {}", prompt_path.display()))?;

        if !config.extract_text {
            warn!(
                "Activity {} is not flagged for text extraction; extracting anyway",
                config.id
            );
        }

        let rubric_ref = rubric_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| rubric_path.display().to_string());

        Ok(Self {
            course: course.code,
            unit,
            config,
            rubric,
            rubric_ref,
            prompt_template,
        })
    }

    /// Activity identifier.
    pub fn id(&self) -> &str {
        &self.config.id
    }
}
