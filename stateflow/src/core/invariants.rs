//! Structural invariants of a [`StateCollection`].
//!
//! A step result is well-formed when every arena index resolves and every
//! group member links back to the group.

use std::fmt;

use crate::core::model::{GroupId, StateCollection};

/// Check structural invariants:
/// - Grouping entries point at existing groups of the same grouping name
/// - Group members point at existing states
/// - Every member state lists the group under `groupings[group.grouping_name]`
/// - State memberships point at existing groups of the same grouping name
pub fn validate_integrity(collection: &StateCollection) -> Vec<String> {
    let mut errors = Vec::new();

    for (name, grouping) in &collection.groupings {
        for (key, group_id) in grouping {
            match collection.group(*group_id) {
                None => errors.push(format!("grouping '{name}' key {key}: unknown {group_id}")),
                Some(group) if group.grouping_name != *name => errors.push(format!(
                    "grouping '{name}' key {key}: {group_id} belongs to '{}'",
                    group.grouping_name
                )),
                Some(_) => {}
            }
        }
    }

    for (idx, group) in collection.groups.iter().enumerate() {
        let group_id = GroupId(idx);
        for state_id in &group.states {
            let Some(state) = collection.state(*state_id) else {
                errors.push(format!("{group_id}: unknown member {state_id}"));
                continue;
            };
            if !state.memberships(&group.grouping_name).contains(&group_id) {
                errors.push(format!(
                    "{group_id}: member '{}' does not list it under '{}'",
                    state.id, group.grouping_name
                ));
            }
        }
    }

    for state in &collection.states {
        for (name, memberships) in &state.groupings {
            for group_id in memberships {
                match collection.group(*group_id) {
                    None => errors.push(format!(
                        "state '{}' grouping '{name}': unknown {group_id}",
                        state.id
                    )),
                    Some(group) if group.grouping_name != *name => errors.push(format!(
                        "state '{}' grouping '{name}': {group_id} belongs to '{}'",
                        state.id, group.grouping_name
                    )),
                    Some(_) => {}
                }
            }
        }
    }

    errors
}

/// A collection that failed [`validate_integrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityError {
    pub errors: Vec<String>,
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed state collection:\n- {}",
            self.errors.join("\n- ")
        )
    }
}

impl std::error::Error for IntegrityError {}

impl StateCollection {
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        let errors = validate_integrity(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(IntegrityError { errors })
        }
    }
}
