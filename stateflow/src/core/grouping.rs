//! Lazy, memoized grouping materialization.
//!
//! Every helper that adds a state to a group also appends the group to the
//! state's membership list, so a grouping built only through this module
//! always satisfies the bidirectional invariant.

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::model::{Group, GroupId, GroupKey, Grouping, State, StateCollection, StateId};
use crate::core::parameters::Parameters;
use crate::process::Selectors;

/// Plugin that partitions a collection into one new named grouping.
pub trait GroupingSelector {
    fn group(
        &self,
        collection: StateCollection,
        parameters: &Parameters,
    ) -> Result<StateCollection>;
}

impl<F> GroupingSelector for F
where
    F: Fn(StateCollection, &Parameters) -> Result<StateCollection>,
{
    fn group(
        &self,
        collection: StateCollection,
        parameters: &Parameters,
    ) -> Result<StateCollection> {
        self(collection, parameters)
    }
}

/// Materialize `grouping_name` unless it already exists.
///
/// A name with no registered grouping selector is left unmaterialized.
pub fn add_grouping(
    collection: StateCollection,
    grouping_name: &str,
    selectors: &Selectors,
    parameters: &Parameters,
) -> Result<StateCollection> {
    if collection.is_materialized(grouping_name) {
        debug!(grouping = grouping_name, "grouping already materialized");
        return Ok(collection);
    }
    let Some(selector) = selectors.grouping_selector(grouping_name) else {
        debug!(grouping = grouping_name, "no grouping selector registered");
        return Ok(collection);
    };
    debug!(grouping = grouping_name, "materializing grouping");
    selector.group(collection, parameters)
}

/// Key assigned to a group added without an explicit key.
///
/// One past the largest integer-parseable key, or `1` when there is none.
/// Gaps are never reused, so a grouping holding `i64::MAX` has no next key.
pub fn next_group_key(grouping: Option<&Grouping>) -> Result<GroupKey> {
    let largest = grouping
        .into_iter()
        .flat_map(|grouping| grouping.keys())
        .filter_map(GroupKey::as_int)
        .max()
        .unwrap_or(0);
    largest
        .checked_add(1)
        .map(GroupKey::Int)
        .ok_or_else(|| anyhow!("group key space exhausted (largest key {largest})"))
}

/// Insert `group` into the named grouping, creating the grouping if needed.
///
/// An existing group at the same key is replaced, not merged. Returns the
/// key used.
pub fn add_group(
    collection: &mut StateCollection,
    grouping_name: &str,
    group: GroupId,
    key: Option<GroupKey>,
) -> Result<GroupKey> {
    let grouping = collection
        .groupings
        .entry(grouping_name.to_string())
        .or_default();
    let key = match key {
        Some(key) => key,
        None => next_group_key(Some(&*grouping))
            .with_context(|| format!("assign key in grouping '{grouping_name}'"))?,
    };
    grouping.insert(key.clone(), group);
    Ok(key)
}

/// Push `group` into the arena and link every member state back to it.
///
/// The group is not placed in any grouping; see [`add_group`].
pub fn create_group(collection: &mut StateCollection, group: Group) -> Result<GroupId> {
    if let Some(missing) = group
        .states
        .iter()
        .find(|id| collection.state(**id).is_none())
    {
        return Err(anyhow!(
            "group '{}' references unknown {}",
            group.grouping_name,
            missing
        ));
    }
    let id = GroupId(collection.groups.len());
    for state_id in &group.states {
        link_state(collection, id, &group.grouping_name, *state_id);
    }
    collection.groups.push(group);
    Ok(id)
}

/// Append `state` to `group`, keeping both sides of the link in sync.
pub fn add_state_to_group(
    collection: &mut StateCollection,
    group: GroupId,
    state: StateId,
) -> Result<()> {
    if collection.state(state).is_none() {
        return Err(anyhow!("unknown {}", state));
    }
    let target = collection
        .group_mut(group)
        .ok_or_else(|| anyhow!("unknown {}", group))?;
    target.states.push(state);
    let grouping_name = target.grouping_name.clone();
    link_state(collection, group, &grouping_name, state);
    Ok(())
}

fn link_state(
    collection: &mut StateCollection,
    group: GroupId,
    grouping_name: &str,
    state: StateId,
) {
    if let Some(state) = collection.state_mut(state) {
        state
            .groupings
            .entry(grouping_name.to_string())
            .or_default()
            .push(group);
    }
}

/// Every group of a grouping in key order; empty when the grouping is absent.
pub fn groups_in_grouping(collection: &StateCollection, grouping_name: &str) -> Vec<GroupId> {
    collection
        .grouping(grouping_name)
        .map(|grouping| grouping.values().copied().collect())
        .unwrap_or_default()
}

/// Build and install a grouping by computing a key per state.
///
/// States for which `key_of` returns `None` join no group. The grouping is
/// installed even when it ends up empty, which marks it materialized.
pub fn partition_by<F>(
    mut collection: StateCollection,
    grouping_name: &str,
    key_of: F,
) -> Result<StateCollection>
where
    F: Fn(&State) -> Option<GroupKey>,
{
    collection
        .groupings
        .entry(grouping_name.to_string())
        .or_default();
    for state_id in collection.state_ids() {
        let Some(key) = collection.state(state_id).and_then(&key_of) else {
            continue;
        };
        let existing = collection
            .grouping(grouping_name)
            .and_then(|grouping| grouping.get(&key))
            .copied();
        match existing {
            Some(group) => add_state_to_group(&mut collection, group, state_id)?,
            None => {
                let group = create_group(
                    &mut collection,
                    Group::new(grouping_name).with_states(vec![state_id]),
                )?;
                add_group(&mut collection, grouping_name, group, Some(key))?;
            }
        }
    }
    Ok(collection)
}

/// Naive concatenation of two collections.
///
/// States and groups of `b` are appended after those of `a` and re-indexed.
/// Groupings with the same name are merged; `b` wins on key conflicts, which
/// can leave replaced groups of `a` in the arena.
pub fn join_state_collections(a: StateCollection, b: StateCollection) -> StateCollection {
    let state_offset = a.states.len();
    let group_offset = a.groups.len();
    let shift_state = |id: StateId| StateId(id.0 + state_offset);
    let shift_group = |id: GroupId| GroupId(id.0 + group_offset);

    let mut joined = a;
    joined.states.extend(b.states.into_iter().map(|mut state| {
        for memberships in state.groupings.values_mut() {
            for group in memberships.iter_mut() {
                *group = shift_group(*group);
            }
        }
        state
    }));
    joined.groups.extend(b.groups.into_iter().map(|mut group| {
        for state in &mut group.states {
            *state = shift_state(*state);
        }
        group
    }));
    for (name, grouping) in b.groupings {
        let target = joined.groupings.entry(name).or_default();
        target.extend(
            grouping
                .into_iter()
                .map(|(key, group)| (key, shift_group(group))),
        );
    }
    joined
}
