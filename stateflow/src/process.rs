//! Typed process registry.
//!
//! Every pipeline step is a [`Process`]. Plugins of each kind are
//! registered explicitly under a [`ProcessId`]; analyses only ever call
//! through the trait. Selectors are registered first into a [`Selectors`]
//! table that measures share, mirroring the independent-then-dependent
//! load order of plugin kinds.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::context::{AnalysisSelector, BoundSelector};
use crate::core::grouping::{GroupingSelector, add_grouping};
use crate::core::model::StateCollection;
use crate::core::parameters::Parameters;
use crate::io::definitions::Definitions;
use crate::io::run_log::Loggers;
use crate::measure::{Measure, MeasureDefinition, MeasureKind, MeasurePlugins, MeasureProcess};

/// Kind of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    Adaptor,
    GroupingSelector,
    StateMeasure,
    GroupMeasure,
    MetaMeasure,
    Reporter,
    /// A nested analysis, resolved by name against the known analyses.
    Analysis,
}

impl ProcessType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessType::Adaptor => "adaptor",
            ProcessType::GroupingSelector => "grouping_selector",
            ProcessType::StateMeasure => "state_measure",
            ProcessType::GroupMeasure => "group_measure",
            ProcessType::MetaMeasure => "meta_measure",
            ProcessType::Reporter => "reporter",
            ProcessType::Analysis => "analysis",
        }
    }
}

impl fmt::Display for ProcessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(process_type, process_name)` reference used by analyses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcessId {
    pub process_type: ProcessType,
    pub process_name: String,
}

impl ProcessId {
    pub fn new(process_type: ProcessType, process_name: impl Into<String>) -> Self {
        Self {
            process_type,
            process_name: process_name.into(),
        }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process_type, self.process_name)
    }
}

/// Uniform executable pipeline step.
pub trait Process {
    fn run(
        &self,
        collection: StateCollection,
        parameters: &Parameters,
        loggers: &Loggers,
    ) -> Result<StateCollection>;
}

impl<F> Process for F
where
    F: Fn(StateCollection, &Parameters, &Loggers) -> Result<StateCollection>,
{
    fn run(
        &self,
        collection: StateCollection,
        parameters: &Parameters,
        loggers: &Loggers,
    ) -> Result<StateCollection> {
        self(collection, parameters, loggers)
    }
}

/// A grouping selector used directly as an analysis step.
///
/// Materializes through [`add_grouping`], so it is memoized the same way as
/// on-demand materialization inside measures.
struct GroupingStep {
    name: String,
    selectors: Rc<Selectors>,
}

impl Process for GroupingStep {
    fn run(
        &self,
        collection: StateCollection,
        parameters: &Parameters,
        _loggers: &Loggers,
    ) -> Result<StateCollection> {
        add_grouping(collection, &self.name, &self.selectors, parameters)
    }
}

/// Analysis and grouping selectors by name.
#[derive(Default)]
pub struct Selectors {
    analysis: BTreeMap<String, Rc<dyn AnalysisSelector>>,
    grouping: BTreeMap<String, Rc<dyn GroupingSelector>>,
}

impl Selectors {
    pub fn register_analysis_selector(
        &mut self,
        name: impl Into<String>,
        selector: impl AnalysisSelector + 'static,
    ) -> &mut Self {
        self.analysis.insert(name.into(), Rc::new(selector));
        self
    }

    pub fn register_grouping_selector(
        &mut self,
        name: impl Into<String>,
        selector: impl GroupingSelector + 'static,
    ) -> &mut Self {
        self.grouping.insert(name.into(), Rc::new(selector));
        self
    }

    pub fn grouping_selector(&self, name: &str) -> Option<&dyn GroupingSelector> {
        self.grouping.get(name).map(|selector| &**selector)
    }

    /// Resolve analysis selectors by name, keeping declared order.
    ///
    /// Fails listing every unknown name.
    pub fn resolve_analysis_selectors(&self, names: &[String]) -> Result<Vec<BoundSelector>> {
        let mut bound = Vec::with_capacity(names.len());
        let mut unknown = Vec::new();
        for name in names {
            match self.analysis.get(name) {
                Some(selector) => bound.push(BoundSelector {
                    name: name.clone(),
                    selector: Rc::clone(selector),
                }),
                None => unknown.push(name.as_str()),
            }
        }
        if !unknown.is_empty() {
            return Err(anyhow!(
                "unknown analysis selectors: {}",
                unknown.join(", ")
            ));
        }
        Ok(bound)
    }
}

/// Lookup table from [`ProcessId`] to bound process.
pub struct Registry {
    selectors: Rc<Selectors>,
    processes: BTreeMap<ProcessId, Rc<dyn Process>>,
}

impl Registry {
    /// Create a registry; every grouping selector is also registered as a
    /// `grouping_selector` process.
    pub fn new(selectors: Selectors) -> Self {
        let selectors = Rc::new(selectors);
        let mut processes: BTreeMap<ProcessId, Rc<dyn Process>> = BTreeMap::new();
        for name in selectors.grouping.keys() {
            processes.insert(
                ProcessId::new(ProcessType::GroupingSelector, name.clone()),
                Rc::new(GroupingStep {
                    name: name.clone(),
                    selectors: Rc::clone(&selectors),
                }),
            );
        }
        Self {
            selectors,
            processes,
        }
    }

    /// Register `process` under `(process_type, name)`, replacing any
    /// previous entry.
    ///
    /// Entries of type [`ProcessType::Analysis`] are never consulted; nested
    /// analyses resolve against the known analyses instead.
    pub fn register(
        &mut self,
        process_type: ProcessType,
        name: impl Into<String>,
        process: impl Process + 'static,
    ) -> &mut Self {
        self.processes
            .insert(ProcessId::new(process_type, name), Rc::new(process));
        self
    }

    /// Bind a measure definition to its plugin and register the result
    /// under the process type of `kind`.
    pub fn register_measure(
        &mut self,
        definition: MeasureDefinition,
        kind: MeasureKind,
        plugin: Rc<dyn Measure>,
    ) -> Result<&mut Self> {
        let id = ProcessId::new(kind.process_type(), definition.name.clone());
        let process = MeasureProcess::bind(definition, kind, plugin, Rc::clone(&self.selectors))?;
        self.processes.insert(id, Rc::new(process));
        Ok(self)
    }

    /// Bind every measure in `definitions` to the plugin it names.
    ///
    /// Fails before registering anything if a plugin is missing.
    pub fn bind_measures(
        &mut self,
        definitions: &Definitions,
        plugins: &MeasurePlugins,
    ) -> Result<&mut Self> {
        let mut unknown: Vec<String> = definitions
            .measures()
            .filter(|(_, definition)| !plugins.contains_key(&definition.measure))
            .map(|(kind, definition)| {
                format!(
                    "{}:{} -> {}",
                    kind.process_type(),
                    definition.name,
                    definition.measure
                )
            })
            .collect();
        if !unknown.is_empty() {
            unknown.sort();
            return Err(anyhow!(
                "unknown measure plugins:\n- {}",
                unknown.join("\n- ")
            ));
        }
        for (kind, definition) in definitions.measures() {
            let plugin = plugins
                .get(&definition.measure)
                .cloned()
                .ok_or_else(|| anyhow!("unknown measure plugin '{}'", definition.measure))?;
            self.register_measure(definition.clone(), kind, plugin)?;
        }
        Ok(self)
    }

    pub fn get(&self, id: &ProcessId) -> Option<Rc<dyn Process>> {
        self.processes.get(id).cloned()
    }

    /// Every registered process id, sorted.
    pub fn known_processes(&self) -> Vec<ProcessId> {
        self.processes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::AnalysisCollection;
    use crate::test_support::{collection_of, group_by_meta, state_with_meta};
    use serde_json::json;

    #[test]
    fn process_ids_display_as_type_and_name() {
        let id = ProcessId::new(ProcessType::GroupMeasure, "mean_score");
        assert_eq!(id.to_string(), "group_measure:mean_score");
    }

    #[test]
    fn process_types_deserialize_snake_case() {
        let id: ProcessId = serde_json::from_value(json!({
            "process_type": "grouping_selector",
            "process_name": "by_user",
        }))
        .expect("parse");
        assert_eq!(id, ProcessId::new(ProcessType::GroupingSelector, "by_user"));
    }

    #[test]
    fn grouping_selectors_double_as_processes() {
        let mut selectors = Selectors::default();
        selectors.register_grouping_selector("by_user", group_by_meta("by_user", "user"));
        let registry = Registry::new(selectors);
        let id = ProcessId::new(ProcessType::GroupingSelector, "by_user");
        assert_eq!(registry.known_processes(), vec![id.clone()]);

        let process = registry.get(&id).expect("registered");
        let collection = collection_of(vec![state_with_meta("a", "user", json!("u1"))]);
        let grouped = process
            .run(collection, &Parameters::new(), &Loggers::console())
            .expect("group");
        assert!(grouped.is_materialized("by_user"));

        let again = process
            .run(grouped.clone(), &Parameters::new(), &Loggers::console())
            .expect("regroup");
        assert_eq!(again, grouped);
    }

    #[test]
    fn resolving_selectors_lists_every_unknown_name() {
        let mut selectors = Selectors::default();
        selectors.register_analysis_selector(
            "keep",
            |analysis: AnalysisCollection, _: &StateCollection| Some(analysis),
        );
        let err = selectors
            .resolve_analysis_selectors(&[
                "missing_a".to_string(),
                "keep".to_string(),
                "missing_b".to_string(),
            ])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown analysis selectors: missing_a, missing_b"
        );
    }

    #[test]
    fn register_replaces_existing_entry() {
        let mut registry = Registry::new(Selectors::default());
        registry
            .register(
                ProcessType::Adaptor,
                "load",
                |_: StateCollection, _: &Parameters, _: &Loggers| -> Result<StateCollection> {
                    Ok(collection_of(Vec::new()))
                },
            )
            .register(
                ProcessType::Adaptor,
                "load",
                |_: StateCollection, _: &Parameters, _: &Loggers| -> Result<StateCollection> {
                    Ok(collection_of(vec![state_with_meta("x", "k", json!(1))]))
                },
            );
        let process = registry
            .get(&ProcessId::new(ProcessType::Adaptor, "load"))
            .expect("registered");
        let loaded = process
            .run(StateCollection::new(), &Parameters::new(), &Loggers::console())
            .expect("run");
        assert_eq!(loaded.states.len(), 1);
    }
}
