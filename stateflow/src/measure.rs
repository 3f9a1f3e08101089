//! Measurement wrapper: turns a declarative measure into a [`Process`].
//!
//! State, group and meta measures share one algorithm, parameterized by
//! where units come from ([`UnitSource`]) and which map results land in
//! ([`MeasureTarget`]):
//!
//! 1. materialize every declared grouping,
//! 2. enumerate units,
//! 3. build an [`AnalysisCollection`] per unit and run the selector chain,
//! 4. call the plugin for every unit the chain kept.

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::context::{AnalysisCollection, BoundSelector, run_selector_chain};
use crate::core::grouping::{add_grouping, groups_in_grouping};
use crate::core::model::{Entity, EntityRef, StateCollection};
use crate::core::parameters::{Parameters, merge_parameters};
use crate::io::run_log::Loggers;
use crate::process::{Process, ProcessType, Selectors};

/// Declarative measure, as written in definition files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureDefinition {
    /// Name results are recorded under; taken from the definition key.
    pub name: String,
    /// Name of the plugin performing the scoring.
    pub measure: String,
    /// Groupings materialized before any unit is measured.
    pub grouping_selectors: Vec<String>,
    /// Selector chain run for every unit, in order.
    pub analysis_selectors: Vec<String>,
    /// Declared parameters; run-time overriding parameters win.
    pub parameters: Parameters,
    /// Map results are recorded in; set from the [`MeasureKind`] at bind time.
    #[serde(skip)]
    pub target: MeasureTarget,
}

impl MeasureDefinition {
    pub fn new(name: impl Into<String>, measure: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measure: measure.into(),
            ..Self::default()
        }
    }

    pub fn with_groupings(mut self, names: &[&str]) -> Self {
        self.grouping_selectors = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_selectors(mut self, names: &[&str]) -> Self {
        self.analysis_selectors = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Where a measure's units come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSource {
    /// Every state in collection order.
    States,
    /// Every group of every declared grouping, in key order.
    Groups,
}

/// Which map of the privileged entity receives the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MeasureTarget {
    #[default]
    Measures,
    Meta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureKind {
    pub units: UnitSource,
    pub target: MeasureTarget,
}

impl MeasureKind {
    pub const STATE: MeasureKind = MeasureKind {
        units: UnitSource::States,
        target: MeasureTarget::Measures,
    };
    pub const GROUP: MeasureKind = MeasureKind {
        units: UnitSource::Groups,
        target: MeasureTarget::Measures,
    };
    pub const META: MeasureKind = MeasureKind {
        units: UnitSource::States,
        target: MeasureTarget::Meta,
    };

    pub fn process_type(self) -> ProcessType {
        match (self.units, self.target) {
            (_, MeasureTarget::Meta) => ProcessType::MetaMeasure,
            (UnitSource::States, MeasureTarget::Measures) => ProcessType::StateMeasure,
            (UnitSource::Groups, MeasureTarget::Measures) => ProcessType::GroupMeasure,
        }
    }
}

/// Plugin that scores the privileged entity of an [`AnalysisCollection`].
///
/// Implementations record their result in the privileged entity's
/// `definition.target` map under `definition.name`, usually via [`record`].
pub trait Measure {
    fn measure(
        &self,
        definition: &MeasureDefinition,
        analysis: &AnalysisCollection,
        collection: &mut StateCollection,
        parameters: &Parameters,
    ) -> Result<()>;
}

impl<F> Measure for F
where
    F: Fn(&MeasureDefinition, &AnalysisCollection, &mut StateCollection, &Parameters) -> Result<()>,
{
    fn measure(
        &self,
        definition: &MeasureDefinition,
        analysis: &AnalysisCollection,
        collection: &mut StateCollection,
        parameters: &Parameters,
    ) -> Result<()> {
        self(definition, analysis, collection, parameters)
    }
}

/// Measure plugins by name, used when binding definition files.
pub type MeasurePlugins = BTreeMap<String, Rc<dyn Measure>>;

/// Record `value` under `name` in the target map of `entity`.
pub fn record(
    collection: &mut StateCollection,
    entity: EntityRef,
    target: MeasureTarget,
    name: &str,
    value: Value,
) -> Result<()> {
    let fields = match target {
        MeasureTarget::Measures => collection.measures_mut(entity),
        MeasureTarget::Meta => collection.meta_mut(entity),
    }
    .ok_or_else(|| anyhow!("unknown {entity}"))?;
    fields.insert(name.to_string(), value);
    Ok(())
}

/// Adapts a scoring function of the privileged entity into a [`Measure`]
/// that records the returned value in the bound target map.
pub struct FieldMeasure<F> {
    score: F,
}

impl<F> FieldMeasure<F> {
    pub fn new(score: F) -> Self
    where
        F: Fn(Entity<'_>, &Parameters) -> Result<Value>,
    {
        Self { score }
    }
}

impl<F> Measure for FieldMeasure<F>
where
    F: Fn(Entity<'_>, &Parameters) -> Result<Value>,
{
    fn measure(
        &self,
        definition: &MeasureDefinition,
        analysis: &AnalysisCollection,
        collection: &mut StateCollection,
        parameters: &Parameters,
    ) -> Result<()> {
        let entity = analysis
            .privileged()
            .ok_or_else(|| anyhow!("analysis collection has no privileged entity"))?;
        let view = collection
            .entity(entity)
            .ok_or_else(|| anyhow!("unknown {entity}"))?;
        let value = (self.score)(view, parameters)?;
        record(
            collection,
            entity,
            definition.target,
            &definition.name,
            value,
        )
    }
}

/// A measure definition bound to its plugin and selectors.
pub struct MeasureProcess {
    definition: MeasureDefinition,
    kind: MeasureKind,
    plugin: Rc<dyn Measure>,
    analysis_selectors: Vec<BoundSelector>,
    selectors: Rc<Selectors>,
}

impl MeasureProcess {
    /// Resolve the definition's analysis selectors against `selectors` and
    /// point its target at the map `kind` writes.
    ///
    /// Group measures must declare at least one grouping.
    pub fn bind(
        mut definition: MeasureDefinition,
        kind: MeasureKind,
        plugin: Rc<dyn Measure>,
        selectors: Rc<Selectors>,
    ) -> Result<Self> {
        if kind.units == UnitSource::Groups && definition.grouping_selectors.is_empty() {
            return Err(anyhow!(
                "group measure '{}' declares no grouping_selectors",
                definition.name
            ));
        }
        let analysis_selectors = selectors
            .resolve_analysis_selectors(&definition.analysis_selectors)
            .with_context(|| format!("bind measure '{}'", definition.name))?;
        definition.target = kind.target;
        Ok(Self {
            definition,
            kind,
            plugin,
            analysis_selectors,
            selectors,
        })
    }

    fn units(&self, collection: &StateCollection) -> Vec<AnalysisCollection> {
        match self.kind.units {
            UnitSource::States => collection
                .state_ids()
                .into_iter()
                .map(AnalysisCollection::for_state)
                .collect(),
            UnitSource::Groups => self
                .definition
                .grouping_selectors
                .iter()
                .flat_map(|name| groups_in_grouping(collection, name))
                .map(AnalysisCollection::for_group)
                .collect(),
        }
    }
}

impl Process for MeasureProcess {
    #[instrument(skip_all, fields(measure = %self.definition.name))]
    fn run(
        &self,
        mut collection: StateCollection,
        parameters: &Parameters,
        loggers: &Loggers,
    ) -> Result<StateCollection> {
        for grouping_name in &self.definition.grouping_selectors {
            collection = add_grouping(collection, grouping_name, &self.selectors, parameters)
                .with_context(|| format!("materialize grouping '{grouping_name}'"))?;
        }

        let effective = merge_parameters(&self.definition.parameters, parameters);
        let units = self.units(&collection);
        let total = units.len();
        let mut measured = 0usize;
        for unit in units {
            let Some(analysis) =
                run_selector_chain(unit, &self.analysis_selectors, &collection)
            else {
                continue;
            };
            let target = analysis.privileged();
            self.plugin
                .measure(&self.definition, &analysis, &mut collection, &effective)
                .with_context(|| {
                    let target = target.map(|entity| entity.to_string()).unwrap_or_default();
                    format!("measure '{}' on {target}", self.definition.name)
                })?;
            measured += 1;
        }

        debug!(measured, total, "measure complete");
        loggers.process.info(format!(
            "{} '{}': measured {measured} of {total} units",
            self.kind.process_type(),
            self.definition.name
        ));
        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::GroupId;
    use crate::test_support::{collection_of, group_by_meta, state_with_meta};
    use serde_json::json;
    use std::cell::RefCell;

    fn selectors_by_user() -> Selectors {
        let mut selectors = Selectors::default();
        selectors
            .register_grouping_selector("by_user", group_by_meta("by_user", "user"))
            .register_grouping_selector("by_team", group_by_meta("by_team", "team"))
            .register_analysis_selector(
                "exclude_all",
                |_: AnalysisCollection, _: &StateCollection| -> Option<AnalysisCollection> {
                    None
                },
            )
            .register_analysis_selector(
                "only_u1",
                |analysis: AnalysisCollection, collection: &StateCollection| {
                    let state = collection.state(analysis.state?)?;
                    (state.meta.get("user") == Some(&json!("u1"))).then_some(analysis)
                },
            );
        selectors
    }

    fn constant(value: Value) -> Rc<dyn Measure> {
        Rc::new(FieldMeasure::new(move |_: Entity<'_>, _: &Parameters| {
            Ok(value.clone())
        }))
    }

    fn users() -> StateCollection {
        collection_of(vec![
            state_with_meta("a", "user", json!("u1")),
            state_with_meta("b", "user", json!("u2")),
            state_with_meta("c", "user", json!("u1")),
        ])
    }

    #[test]
    fn state_measure_records_on_every_state() {
        let process = MeasureProcess::bind(
            MeasureDefinition::new("flag", "constant"),
            MeasureKind::STATE,
            constant(json!(true)),
            Rc::new(selectors_by_user()),
        )
        .expect("bind");

        let measured = process
            .run(users(), &Parameters::new(), &Loggers::console())
            .expect("run");
        assert!(
            measured
                .states
                .iter()
                .all(|state| state.measures.get("flag") == Some(&json!(true)))
        );
    }

    #[test]
    fn excluding_selector_leaves_measures_unchanged() {
        let process = MeasureProcess::bind(
            MeasureDefinition::new("flag", "constant").with_selectors(&["exclude_all"]),
            MeasureKind::STATE,
            constant(json!(true)),
            Rc::new(selectors_by_user()),
        )
        .expect("bind");

        let before = users();
        let after = process
            .run(before.clone(), &Parameters::new(), &Loggers::console())
            .expect("run");
        assert_eq!(after, before);
    }

    #[test]
    fn selector_filters_units() {
        let process = MeasureProcess::bind(
            MeasureDefinition::new("flag", "constant").with_selectors(&["only_u1"]),
            MeasureKind::STATE,
            constant(json!(1)),
            Rc::new(selectors_by_user()),
        )
        .expect("bind");

        let after = process
            .run(users(), &Parameters::new(), &Loggers::console())
            .expect("run");
        let flagged: Vec<&str> = after
            .states
            .iter()
            .filter(|state| state.measures.contains_key("flag"))
            .map(|state| state.id.as_str())
            .collect();
        assert_eq!(flagged, vec!["a", "c"]);
    }

    #[test]
    fn group_measure_materializes_grouping_and_visits_each_group_once() {
        let visited = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&visited);
        let plugin = move |definition: &MeasureDefinition,
                           analysis: &AnalysisCollection,
                           collection: &mut StateCollection,
                           _: &Parameters|
              -> Result<()> {
            let group = analysis.group.ok_or_else(|| anyhow!("no group"))?;
            seen.borrow_mut().push(group);
            let size = collection.groups[group.0].states.len();
            record(
                collection,
                EntityRef::Group(group),
                definition.target,
                &definition.name,
                json!(size),
            )
        };
        let process = MeasureProcess::bind(
            MeasureDefinition::new("size", "count").with_groupings(&["by_user"]),
            MeasureKind::GROUP,
            Rc::new(plugin),
            Rc::new(selectors_by_user()),
        )
        .expect("bind");

        let after = process
            .run(users(), &Parameters::new(), &Loggers::console())
            .expect("run");
        assert!(after.is_materialized("by_user"));
        assert_eq!(*visited.borrow(), vec![GroupId(0), GroupId(1)]);
        let sizes: Vec<&Value> = after.groups.iter().map(|g| &g.measures["size"]).collect();
        assert_eq!(sizes, vec![&json!(2), &json!(1)]);
    }

    fn recording_group_ids(visited: Rc<RefCell<Vec<GroupId>>>) -> Rc<dyn Measure> {
        Rc::new(
            move |definition: &MeasureDefinition,
                  analysis: &AnalysisCollection,
                  collection: &mut StateCollection,
                  _: &Parameters|
                  -> Result<()> {
                let group = analysis.group.ok_or_else(|| anyhow!("no group"))?;
                visited.borrow_mut().push(group);
                record(
                    collection,
                    EntityRef::Group(group),
                    definition.target,
                    &definition.name,
                    json!(true),
                )
            },
        )
    }

    #[test]
    fn group_measure_over_unregistered_grouping_measures_nothing() {
        let visited = Rc::new(RefCell::new(Vec::new()));
        let process = MeasureProcess::bind(
            MeasureDefinition::new("seen", "mark").with_groupings(&["by_region"]),
            MeasureKind::GROUP,
            recording_group_ids(Rc::clone(&visited)),
            Rc::new(selectors_by_user()),
        )
        .expect("bind");

        let before = users();
        let after = process
            .run(before.clone(), &Parameters::new(), &Loggers::console())
            .expect("run");
        assert!(!after.is_materialized("by_region"));
        assert_eq!(after, before);
        assert!(visited.borrow().is_empty());
    }

    #[test]
    fn group_measure_visits_every_group_of_every_declared_grouping() {
        let member = |id: &str, user: &str, team: &str| {
            let mut state = state_with_meta(id, "user", json!(user));
            state.meta.insert("team".to_string(), json!(team));
            state
        };
        let members = collection_of(vec![
            member("a", "u1", "red"),
            member("b", "u2", "blue"),
            member("c", "u1", "red"),
        ]);
        let visited = Rc::new(RefCell::new(Vec::new()));
        let process = MeasureProcess::bind(
            MeasureDefinition::new("seen", "mark").with_groupings(&["by_user", "by_team"]),
            MeasureKind::GROUP,
            recording_group_ids(Rc::clone(&visited)),
            Rc::new(selectors_by_user()),
        )
        .expect("bind");

        let after = process
            .run(members, &Parameters::new(), &Loggers::console())
            .expect("run");
        assert!(after.is_materialized("by_user"));
        assert!(after.is_materialized("by_team"));
        // Groupings in declaration order, groups in key order: "blue" < "red".
        assert_eq!(
            *visited.borrow(),
            vec![GroupId(0), GroupId(1), GroupId(3), GroupId(2)]
        );
        assert!(after.groups.iter().all(|g| g.measures["seen"] == json!(true)));
    }

    #[test]
    fn bound_kind_decides_which_map_is_written() {
        let plugin: Rc<dyn Measure> =
            Rc::new(FieldMeasure::new(|_: Entity<'_>, _: &Parameters| Ok(json!("x"))));
        let bind = |kind: MeasureKind| {
            MeasureProcess::bind(
                MeasureDefinition::new("tag", "constant"),
                kind,
                Rc::clone(&plugin),
                Rc::new(Selectors::default()),
            )
            .expect("bind")
        };

        let as_state = bind(MeasureKind::STATE)
            .run(users(), &Parameters::new(), &Loggers::console())
            .expect("run state");
        assert_eq!(as_state.states[0].measures["tag"], json!("x"));
        assert!(!as_state.states[0].meta.contains_key("tag"));

        let as_meta = bind(MeasureKind::META)
            .run(users(), &Parameters::new(), &Loggers::console())
            .expect("run meta");
        assert_eq!(as_meta.states[0].meta["tag"], json!("x"));
        assert!(as_meta.states[0].measures.is_empty());
    }

    #[test]
    fn meta_measure_writes_meta_map() {
        let plugin = FieldMeasure::new(|entity: Entity<'_>, _: &Parameters| {
            Ok(json!(entity.meta().len()))
        });
        let process = MeasureProcess::bind(
            MeasureDefinition::new("meta_count", "count_meta"),
            MeasureKind::META,
            Rc::new(plugin),
            Rc::new(Selectors::default()),
        )
        .expect("bind");

        let after = process
            .run(users(), &Parameters::new(), &Loggers::console())
            .expect("run");
        assert_eq!(after.states[0].meta["meta_count"], json!(1));
        assert!(after.states[0].measures.is_empty());
    }

    #[test]
    fn overriding_parameters_reach_the_plugin() {
        let plugin = FieldMeasure::new(|_: Entity<'_>, parameters: &Parameters| {
            Ok(json!([parameters["window"].clone(), parameters["label"].clone()]))
        });
        let process = MeasureProcess::bind(
            MeasureDefinition::new("echo", "echo")
                .with_parameter("window", json!(3))
                .with_parameter("label", json!("declared")),
            MeasureKind::STATE,
            Rc::new(plugin),
            Rc::new(Selectors::default()),
        )
        .expect("bind");

        let overriding = Parameters::from([("label".to_string(), json!("caller"))]);
        let after = process
            .run(users(), &overriding, &Loggers::console())
            .expect("run");
        assert_eq!(after.states[0].measures["echo"], json!([3, "caller"]));
    }

    #[test]
    fn plugin_error_names_measure_and_unit() {
        let plugin = |_: &MeasureDefinition,
                      _: &AnalysisCollection,
                      _: &mut StateCollection,
                      _: &Parameters|
         -> Result<()> { Err(anyhow!("boom")) };
        let process = MeasureProcess::bind(
            MeasureDefinition::new("fragile", "fragile"),
            MeasureKind::STATE,
            Rc::new(plugin),
            Rc::new(Selectors::default()),
        )
        .expect("bind");

        let err = process
            .run(users(), &Parameters::new(), &Loggers::console())
            .unwrap_err();
        assert_eq!(err.to_string(), "measure 'fragile' on state#0");
        assert_eq!(err.root_cause().to_string(), "boom");
    }

    #[test]
    fn binding_rejects_unknown_selectors_and_groupless_group_measures() {
        let err = MeasureProcess::bind(
            MeasureDefinition::new("m", "constant").with_selectors(&["nope"]),
            MeasureKind::STATE,
            constant(json!(0)),
            Rc::new(Selectors::default()),
        )
        .err()
        .expect("unknown selector");
        assert!(format!("{err:#}").contains("unknown analysis selectors: nope"));

        let err = MeasureProcess::bind(
            MeasureDefinition::new("g", "constant"),
            MeasureKind::GROUP,
            constant(json!(0)),
            Rc::new(Selectors::default()),
        )
        .err()
        .expect("no grouping");
        assert!(err.to_string().contains("declares no grouping_selectors"));
    }
}
