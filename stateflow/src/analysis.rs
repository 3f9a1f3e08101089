//! Analysis preparation and execution.
//!
//! `prepare` resolves every step of an analysis (recursively through nested
//! analyses) before anything runs. `run` folds the bound steps over one
//! collection; a step that errors or leaves the collection malformed is
//! logged and discarded, and the fold continues from the collection as it
//! was before that step.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::model::StateCollection;
use crate::core::parameters::Parameters;
use crate::io::run_log::{Loggers, RunIdentity, START_TIME_FORMAT};
use crate::process::{Process, ProcessId, ProcessType, Registry};

/// A named, ordered list of process references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<ProcessId>,
}

impl Analysis {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, process_type: ProcessType, process_name: &str) -> Self {
        self.steps.push(ProcessId::new(process_type, process_name));
        self
    }
}

/// Analyses available for nesting, by name.
pub type KnownAnalyses = BTreeMap<String, Analysis>;

pub struct PreparedStep {
    pub id: ProcessId,
    pub process: Rc<dyn Process>,
}

/// An analysis whose every step is bound to a process.
pub struct PreparedAnalysis {
    pub name: String,
    pub steps: Vec<PreparedStep>,
}

impl PreparedAnalysis {
    pub fn step_ids(&self) -> Vec<&ProcessId> {
        self.steps.iter().map(|step| &step.id).collect()
    }
}

impl fmt::Debug for PreparedAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedAnalysis")
            .field("name", &self.name)
            .field("steps", &self.step_ids())
            .finish()
    }
}

/// References that did not resolve while preparing an analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingProcessesError {
    pub analysis: String,
    /// Deduplicated, in discovery order.
    pub missing: Vec<ProcessId>,
    pub known: Vec<ProcessId>,
}

impl fmt::Display for MissingProcessesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "analysis '{}' references missing processes:",
            self.analysis
        )?;
        for id in &self.missing {
            writeln!(f, "- {id}")?;
        }
        write!(f, "known processes:")?;
        if self.known.is_empty() {
            write!(f, " (none)")?;
        }
        for id in &self.known {
            write!(f, "\n- {id}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingProcessesError {}

/// Nested analyses that reference themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicAnalysisError {
    /// Analysis names from the outermost down to the repeated one.
    pub path: Vec<String>,
}

impl fmt::Display for CyclicAnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cyclic analysis nesting: {}", self.path.join(" -> "))
    }
}

impl std::error::Error for CyclicAnalysisError {}

/// Resolve every step of `analysis`.
///
/// Nested analyses are looked up by name in `known`. Nothing is executed;
/// all unresolved references are reported together.
pub fn prepare(
    analysis: &Analysis,
    registry: &Registry,
    known: &KnownAnalyses,
) -> Result<PreparedAnalysis> {
    let mut binder = Binder {
        registry,
        known,
        stack: Vec::new(),
        missing: Vec::new(),
    };
    let prepared = binder.bind(analysis)?;
    if !binder.missing.is_empty() {
        return Err(MissingProcessesError {
            analysis: analysis.name.clone(),
            missing: binder.missing,
            known: registry.known_processes(),
        }
        .into());
    }
    debug!(analysis = %prepared.name, steps = prepared.steps.len(), "analysis prepared");
    Ok(prepared)
}

struct Binder<'a> {
    registry: &'a Registry,
    known: &'a KnownAnalyses,
    stack: Vec<String>,
    missing: Vec<ProcessId>,
}

impl Binder<'_> {
    fn bind(&mut self, analysis: &Analysis) -> Result<PreparedAnalysis, CyclicAnalysisError> {
        self.stack.push(analysis.name.clone());
        let mut steps = Vec::with_capacity(analysis.steps.len());
        for id in &analysis.steps {
            let process = match id.process_type {
                ProcessType::Analysis => self.bind_nested(id)?,
                _ => self.registry.get(id),
            };
            match process {
                Some(process) => steps.push(PreparedStep {
                    id: id.clone(),
                    process,
                }),
                None => self.record_missing(id),
            }
        }
        self.stack.pop();
        Ok(PreparedAnalysis {
            name: analysis.name.clone(),
            steps,
        })
    }

    fn bind_nested(
        &mut self,
        id: &ProcessId,
    ) -> Result<Option<Rc<dyn Process>>, CyclicAnalysisError> {
        let Some(nested) = self.known.get(&id.process_name) else {
            return Ok(None);
        };
        if self.stack.contains(&nested.name) {
            let mut path = self.stack.clone();
            path.push(nested.name.clone());
            return Err(CyclicAnalysisError { path });
        }
        let prepared = self.bind(nested)?;
        Ok(Some(Rc::new(AnalysisProcess { analysis: prepared })))
    }

    fn record_missing(&mut self, id: &ProcessId) {
        if !self.missing.contains(id) {
            self.missing.push(id.clone());
        }
    }
}

/// A prepared analysis used as a step of another analysis.
///
/// Runs with the parent's loggers and overriding parameters.
pub struct AnalysisProcess {
    analysis: PreparedAnalysis,
}

impl Process for AnalysisProcess {
    fn run(
        &self,
        collection: StateCollection,
        parameters: &Parameters,
        loggers: &Loggers,
    ) -> Result<StateCollection> {
        loggers
            .analysis
            .info(format!("Entering nested analysis '{}'", self.analysis.name));
        let collection = fold_steps(&self.analysis, collection, parameters, loggers);
        loggers
            .analysis
            .info(format!("Leaving nested analysis '{}'", self.analysis.name));
        Ok(collection)
    }
}

/// Run a prepared analysis from `collection` (empty when `None`).
///
/// Step failures are contained; only log destination setup can fail.
#[instrument(skip_all, fields(analysis = %prepared.name))]
pub fn run(
    prepared: &PreparedAnalysis,
    collection: Option<StateCollection>,
    log_dir: Option<&Path>,
) -> Result<StateCollection> {
    let identity = RunIdentity::new(&prepared.name);
    let loggers = Loggers::open(log_dir, &identity)?;
    info!(run_id = %identity.run_id, start_time = %identity.start_time, "analysis started");

    loggers.analysis.info(format!(
        "Analysis '{}' started at {} (run {})",
        prepared.name, identity.start_time, identity.run_id
    ));
    loggers
        .analysis
        .info(format!("stateflow version {}", env!("CARGO_PKG_VERSION")));

    let parameters = identity.parameters();
    let rendered =
        serde_json::to_string(&parameters).context("render overriding parameters")?;
    loggers
        .analysis
        .info(format!("Analysis Overriding Parameters: {rendered}"));
    let collection = fold_steps(
        prepared,
        collection.unwrap_or_default(),
        &parameters,
        &loggers,
    );

    loggers.analysis.info(format!(
        "Analysis '{}' completed at {}",
        prepared.name,
        Utc::now().format(START_TIME_FORMAT)
    ));
    info!(run_id = %identity.run_id, "analysis completed");
    Ok(collection)
}

/// Run several prepared analyses in order, threading one collection that
/// starts empty.
pub fn run_analyses(
    prepared: &[PreparedAnalysis],
    log_dir: Option<&Path>,
) -> Result<StateCollection> {
    let mut collection = StateCollection::new();
    for analysis in prepared {
        collection = run(analysis, Some(collection), log_dir)?;
    }
    Ok(collection)
}

fn fold_steps(
    analysis: &PreparedAnalysis,
    mut collection: StateCollection,
    parameters: &Parameters,
    loggers: &Loggers,
) -> StateCollection {
    for (idx, step) in analysis.steps.iter().enumerate() {
        let number = idx + 1;
        loggers
            .analysis
            .info(format!("Running step {number} : {}", step.id));
        let snapshot = collection.clone();
        let outcome = step
            .process
            .run(collection, parameters, loggers)
            .and_then(|next| {
                next.check_integrity()?;
                Ok(next)
            });
        collection = match outcome {
            Ok(next) => next,
            Err(err) => {
                loggers.status.error(format!(
                    "step {number} ({}) of '{}' failed: {err:#}",
                    step.id, analysis.name
                ));
                loggers.status.warn(format!(
                    "step {number} ({}) discarded; continuing with the collection from before it",
                    step.id
                ));
                snapshot
            }
        };
    }
    collection
}
