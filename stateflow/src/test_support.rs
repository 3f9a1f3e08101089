//! Test-only builders and scripted plugins.

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::grouping::{GroupingSelector, partition_by};
use crate::core::model::{GroupId, GroupKey, State, StateCollection};
use crate::core::parameters::Parameters;
use crate::io::run_log::Loggers;
use crate::process::Process;

/// Create a state with a null payload and empty maps.
pub fn state(id: &str) -> State {
    State::new(id, Value::Null)
}

pub fn state_with_data(id: &str, data: Value) -> State {
    State::new(id, data)
}

/// Create a state with a single `meta` entry.
pub fn state_with_meta(id: &str, key: &str, value: Value) -> State {
    let mut state = state(id);
    state.meta.insert(key.to_string(), value);
    state
}

pub fn collection_of(states: Vec<State>) -> StateCollection {
    StateCollection::from_states(states)
}

/// Grouping selector that partitions states by a `meta` field.
///
/// Integer values become `Int` keys; strings become `Name` keys. States
/// without the field join no group.
pub fn group_by_meta(grouping_name: &str, field: &str) -> impl GroupingSelector + 'static {
    let grouping_name = grouping_name.to_string();
    let field = field.to_string();
    move |collection: StateCollection, _: &Parameters| -> Result<StateCollection> {
        partition_by(collection, &grouping_name, |state: &State| {
            match state.meta.get(&field)? {
                Value::Number(number) => number.as_i64().map(GroupKey::Int),
                Value::String(name) => Some(GroupKey::Name(name.clone())),
                _ => None,
            }
        })
    }
}

/// Step that records `meta[tag] = true` on every state.
pub fn tagging_step(tag: &str) -> impl Process + 'static {
    let tag = tag.to_string();
    move |mut collection: StateCollection,
          _: &Parameters,
          _: &Loggers|
          -> Result<StateCollection> {
        for state in &mut collection.states {
            state.meta.insert(tag.clone(), json!(true));
        }
        Ok(collection)
    }
}

/// Step that always fails with `message`.
pub fn failing_step(message: &str) -> impl Process + 'static {
    let message = message.to_string();
    move |_: StateCollection, _: &Parameters, _: &Loggers| -> Result<StateCollection> {
        Err(anyhow!("{message}"))
    }
}

/// Step that tags every state and then points the first one at a group
/// that does not exist.
pub fn malformed_step() -> impl Process + 'static {
    |mut collection: StateCollection, _: &Parameters, _: &Loggers| -> Result<StateCollection> {
        let dangling = GroupId(collection.groups.len() + 100);
        for state in &mut collection.states {
            state.meta.insert("broken".to_string(), json!(true));
        }
        if let Some(first) = collection.states.first_mut() {
            first
                .groupings
                .entry("ghost".to_string())
                .or_default()
                .push(dangling);
        }
        Ok(collection)
    }
}

/// Fresh directory for run logs; removed when dropped.
pub fn log_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}
