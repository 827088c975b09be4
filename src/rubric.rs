#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// One performance level of a criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Points awarded at this level.
    #[serde(alias = "puntaje")]
    pub score:       f64,
    /// What work at this level looks like.
    #[serde(alias = "descripcion", default)]
    pub description: String,
}

/// A named, independently scored dimension of a rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricCriterion {
    /// Name, unique within its rubric.
    #[serde(alias = "nombre")]
    pub name:    String,
    /// Highest score this criterion can award.
    #[serde(alias = "maximo", alias = "puntaje_maximo")]
    pub maximum: f64,
    /// Levels, highest score first.
    #[serde(alias = "niveles", default)]
    pub levels:  Vec<Level>,
}

/// A rubric as loaded from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    /// Display name.
    #[serde(alias = "nombre", default)]
    pub name:     String,
    /// Criteria in authoring order.
    #[serde(alias = "criterios")]
    pub criteria: Vec<RubricCriterion>,
}

impl Rubric {
    /// Parses and validates a rubric document.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut rubric: Rubric = serde_json::from_str(text).context("Rubric is not valid JSON")?;
        rubric.normalize();
        rubric.validate()?;
        Ok(rubric)
    }

    /// Sorts every criterion's levels by descending score.
    fn normalize(&mut self) {
        for criterion in &mut self.criteria {
            criterion
                .levels
                .sort_by(|a, b| b.score.total_cmp(&a.score));
        }
    }

    /// Rejects rubrics the rest of the pipeline cannot reconcile against.
    fn validate(&self) -> Result<()> {
        ensure!(!self.criteria.is_empty(), "Rubric `{}` declares no criteria", self.name);

        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            ensure!(!criterion.name.trim().is_empty(), "Rubric `{}` has a criterion without a name", self.name);
            ensure!(
                seen.insert(criterion.name.as_str()),
                "Criterion `{}` appears more than once in rubric `{}`",
                criterion.name,
                self.name
            );
            ensure!(
                criterion.maximum.is_finite() && criterion.maximum >= 0.0,
                "Criterion `{}` has an invalid maximum ({})",
                criterion.name,
                criterion.maximum
            );
            for level in &criterion.levels {
                ensure!(
                    (0.0..=criterion.maximum).contains(&level.score),
                    "Criterion `{}` has a level scored {} outside 0..={}",
                    criterion.name,
                    level.score,
                    criterion.maximum
                );
            }
        }

        Ok(())
    }

    /// Looks a criterion up by exact name.
    pub fn criterion(&self, name: &str) -> Option<&RubricCriterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    /// Returns whether the rubric declares `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.criterion(name).is_some()
    }

    /// Criterion names in authoring order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|c| c.name.as_str())
    }

    /// Sum of every criterion's maximum.
    pub fn total_maximum(&self) -> f64 {
        self.criteria.iter().map(|c| c.maximum).sum()
    }

    /// A copy restricted to `names`, preserving authoring order.
    pub fn restricted_to(&self, names: &[String]) -> Rubric {
        Rubric {
            name:     self.name.clone(),
            criteria: self
                .criteria
                .iter()
                .filter(|c| names.iter().any(|n| n == &c.name))
                .cloned()
                .collect(),
        }
    }
}

/// Reads and validates the rubric at `path`.
pub fn load_rubric(path: &Path) -> Result<Rubric> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read rubric {}", path.display()))?;
    Rubric::from_json(&text).with_context(|| format!("Invalid rubric {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_spanish_keys_and_sorts_levels() {
        let rubric = Rubric::from_json(
            r#"{"nombre": "R", "criterios": [
                {"nombre": "Portada", "maximo": 5,
                 "niveles": [{"score": 0, "descripcion": "no"}, {"score": 5, "descripcion": "sí"}]}
            ]}"#,
        )
        .expect("parse");

        assert_eq!(rubric.criteria[0].levels[0].score, 5.0);
        assert_eq!(rubric.total_maximum(), 5.0);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Rubric::from_json(
            r#"{"name": "R", "criteria": [
                {"name": "A", "maximum": 5}, {"name": "A", "maximum": 3}
            ]}"#,
        )
        .expect_err("duplicate");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_level_above_maximum() {
        assert!(
            Rubric::from_json(
                r#"{"criteria": [{"name": "A", "maximum": 5, "levels": [{"score": 6}]}]}"#
            )
            .is_err()
        );
    }
}
