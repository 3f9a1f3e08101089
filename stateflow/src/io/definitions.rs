//! Analysis and measure definition files (TOML).
//!
//! ```toml
//! [[analysis]]
//! name = "daily"
//! steps = [
//!     { process_type = "adaptor", process_name = "load" },
//!     { process_type = "state_measure", process_name = "score" },
//! ]
//!
//! [state_measures.score]
//! measure = "length"
//! analysis_selectors = ["non_empty"]
//! parameters = { window = 3 }
//! ```
//!
//! Measure names come from their table keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{Analysis, KnownAnalyses};
use crate::measure::{MeasureDefinition, MeasureKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Definitions {
    #[serde(rename = "analysis")]
    pub analyses: Vec<Analysis>,
    pub state_measures: BTreeMap<String, MeasureDefinition>,
    pub group_measures: BTreeMap<String, MeasureDefinition>,
    pub meta_measures: BTreeMap<String, MeasureDefinition>,
}

impl Definitions {
    /// Fold `other` in; its analyses and measures replace same-named ones.
    pub fn merge(&mut self, other: Definitions) {
        for analysis in other.analyses {
            match self.analyses.iter_mut().find(|a| a.name == analysis.name) {
                Some(existing) => *existing = analysis,
                None => self.analyses.push(analysis),
            }
        }
        self.state_measures.extend(other.state_measures);
        self.group_measures.extend(other.group_measures);
        self.meta_measures.extend(other.meta_measures);
    }

    pub fn analysis(&self, name: &str) -> Option<&Analysis> {
        self.analyses.iter().find(|analysis| analysis.name == name)
    }

    pub fn known_analyses(&self) -> KnownAnalyses {
        self.analyses
            .iter()
            .map(|analysis| (analysis.name.clone(), analysis.clone()))
            .collect()
    }

    /// Every measure definition with the kind it binds as.
    pub fn measures(&self) -> impl Iterator<Item = (MeasureKind, &MeasureDefinition)> {
        let states = self
            .state_measures
            .values()
            .map(|definition| (MeasureKind::STATE, definition));
        let groups = self
            .group_measures
            .values()
            .map(|definition| (MeasureKind::GROUP, definition));
        let metas = self
            .meta_measures
            .values()
            .map(|definition| (MeasureKind::META, definition));
        states.chain(groups).chain(metas)
    }

    fn name_measures(&mut self) {
        for table in [
            &mut self.state_measures,
            &mut self.group_measures,
            &mut self.meta_measures,
        ] {
            for (key, definition) in table.iter_mut() {
                definition.name.clone_from(key);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();
        for analysis in &self.analyses {
            if analysis.name.trim().is_empty() {
                errors.push("analysis with empty name".to_string());
            } else if !seen.insert(analysis.name.as_str()) {
                errors.push(format!("duplicate analysis '{}'", analysis.name));
            }
        }
        for (kind, definition) in self.measures() {
            if definition.measure.trim().is_empty() {
                errors.push(format!(
                    "{}:{} names no measure plugin",
                    kind.process_type(),
                    definition.name
                ));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid definitions:\n- {}", errors.join("\n- ")))
        }
    }
}

pub fn parse_definitions(contents: &str) -> Result<Definitions> {
    let mut definitions: Definitions = toml::from_str(contents).context("parse definitions")?;
    definitions.name_measures();
    definitions.validate()?;
    Ok(definitions)
}

pub fn load_definitions(path: &Path) -> Result<Definitions> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_definitions(&contents).with_context(|| format!("load {}", path.display()))
}

/// Load every `*.toml` file of `dir` in file name order.
///
/// Later files replace same-named entries of earlier ones.
pub fn load_definitions_dir(dir: &Path) -> Result<Definitions> {
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut merged = Definitions::default();
    for path in &paths {
        debug!(path = %path.display(), "loading definitions");
        merged.merge(load_definitions(path)?);
    }
    merged.validate()?;
    Ok(merged)
}
