//! Per-unit analysis context and selector chaining.

use std::rc::Rc;

use tracing::debug;

use crate::core::model::{EntityRef, GroupId, StateCollection, StateId};

/// Ephemeral context built for one measured unit.
///
/// Never stored in the [`StateCollection`]; dropped once the unit has been
/// measured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisCollection {
    /// Privileged state, for state-level measures.
    pub state: Option<StateId>,
    /// Privileged group, for group-level measures.
    pub group: Option<GroupId>,
    /// Contextual states assembled by selectors, initially empty.
    pub state_list: Vec<StateId>,
}

impl AnalysisCollection {
    pub fn for_state(state: StateId) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn for_group(group: GroupId) -> Self {
        Self {
            group: Some(group),
            ..Self::default()
        }
    }

    /// The privileged entity, state first.
    pub fn privileged(&self) -> Option<EntityRef> {
        self.state
            .map(EntityRef::State)
            .or(self.group.map(EntityRef::Group))
    }
}

/// Plugin that filters or enriches an [`AnalysisCollection`].
///
/// Returning `None` excludes the unit from measurement.
pub trait AnalysisSelector {
    fn select(
        &self,
        analysis: AnalysisCollection,
        collection: &StateCollection,
    ) -> Option<AnalysisCollection>;
}

impl<F> AnalysisSelector for F
where
    F: Fn(AnalysisCollection, &StateCollection) -> Option<AnalysisCollection>,
{
    fn select(
        &self,
        analysis: AnalysisCollection,
        collection: &StateCollection,
    ) -> Option<AnalysisCollection> {
        self(analysis, collection)
    }
}

/// An analysis selector resolved by name.
#[derive(Clone)]
pub struct BoundSelector {
    pub name: String,
    pub selector: Rc<dyn AnalysisSelector>,
}

impl std::fmt::Debug for BoundSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSelector")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Run `selectors` strictly in declared order.
///
/// The first selector that returns `None` stops the chain.
pub fn run_selector_chain(
    analysis: AnalysisCollection,
    selectors: &[BoundSelector],
    collection: &StateCollection,
) -> Option<AnalysisCollection> {
    let mut current = analysis;
    for bound in selectors {
        match bound.selector.select(current, collection) {
            Some(next) => current = next,
            None => {
                debug!(selector = %bound.name, "selector excluded unit");
                return None;
            }
        }
    }
    Some(current)
}
