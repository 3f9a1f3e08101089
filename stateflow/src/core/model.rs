//! Entity model threaded through an analysis run.
//!
//! States and groups live in arenas owned by the [`StateCollection`]. Links
//! between them are [`StateId`]/[`GroupId`] indices into those arenas, so
//! membership stays cycle-free and the bidirectional invariant can be
//! checked explicitly (see [`crate::core::invariants`]).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named values recorded on a state or group (`measures` and `meta`).
pub type Fields = BTreeMap<String, Value>;

/// Groups of one grouping, keyed by group key.
pub type Grouping = BTreeMap<GroupKey, GroupId>;

/// Index of a [`State`] in [`StateCollection::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub usize);

/// Index of a [`Group`] in [`StateCollection::groups`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Field category addressed by sort keys and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Data,
    Measure,
    Meta,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Data => "data",
            Category::Measure => "measure",
            Category::Meta => "meta",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record under analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub id: String,
    /// Opaque payload; object payloads are addressable by field name.
    pub data: Value,
    pub measures: Fields,
    pub meta: Fields,
    /// Grouping name to the groups this state belongs to, in membership order.
    pub groupings: BTreeMap<String, Vec<GroupId>>,
}

impl State {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            measures: Fields::new(),
            meta: Fields::new(),
            groupings: BTreeMap::new(),
        }
    }

    /// Groups of `grouping_name` this state belongs to (empty when none).
    pub fn memberships(&self, grouping_name: &str) -> &[GroupId] {
        self.groupings
            .get(grouping_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A named cluster of states produced by a grouping selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub grouping_name: String,
    /// Member states in insertion order. The group does not own them.
    pub states: Vec<StateId>,
    pub measures: Fields,
    pub meta: Fields,
    /// Optional descriptive data; `None` makes every data lookup miss.
    pub data: Option<Value>,
}

impl Group {
    pub fn new(grouping_name: impl Into<String>) -> Self {
        Self {
            grouping_name: grouping_name.into(),
            states: Vec::new(),
            measures: Fields::new(),
            meta: Fields::new(),
            data: None,
        }
    }

    pub fn with_states(mut self, states: Vec<StateId>) -> Self {
        self.states = states;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Key of a group inside its grouping.
///
/// Keys are integer-parseable when they are `Int` or a `Name` whose text
/// parses as an integer. Only those take part in automatic key assignment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupKey {
    Int(i64),
    Name(String),
}

impl GroupKey {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            GroupKey::Int(value) => Some(*value),
            GroupKey::Name(name) => name.trim().parse().ok(),
        }
    }
}

impl From<i64> for GroupKey {
    fn from(value: i64) -> Self {
        GroupKey::Int(value)
    }
}

impl From<&str> for GroupKey {
    fn from(value: &str) -> Self {
        GroupKey::Name(value.to_string())
    }
}

impl From<String> for GroupKey {
    fn from(value: String) -> Self {
        GroupKey::Name(value)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Int(value) => write!(f, "{value}"),
            GroupKey::Name(name) => f.write_str(name),
        }
    }
}

/// Reference to either kind of scorable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    State(StateId),
    Group(GroupId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::State(id) => id.fmt(f),
            EntityRef::Group(id) => id.fmt(f),
        }
    }
}

/// Borrowed state or group, addressable through data/measure/meta categories.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    State(&'a State),
    Group(&'a Group),
}

impl<'a> Entity<'a> {
    /// Value of `field` in `category`, if present.
    pub fn field(self, category: Category, field: &str) -> Option<&'a Value> {
        match (self, category) {
            (Entity::State(state), Category::Data) => state.data.get(field),
            (Entity::Group(group), Category::Data) => group.data.as_ref()?.get(field),
            (Entity::State(state), Category::Measure) => state.measures.get(field),
            (Entity::Group(group), Category::Measure) => group.measures.get(field),
            (Entity::State(state), Category::Meta) => state.meta.get(field),
            (Entity::Group(group), Category::Meta) => group.meta.get(field),
        }
    }

    pub fn meta(self) -> &'a Fields {
        match self {
            Entity::State(state) => &state.meta,
            Entity::Group(group) => &group.meta,
        }
    }
}

/// The ambient mutable context for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateCollection {
    pub states: Vec<State>,
    /// Arena of every group created during the run, including groups that
    /// were later replaced in their grouping.
    pub groups: Vec<Group>,
    /// Materialized groupings by name.
    pub groupings: BTreeMap<String, Grouping>,
}

impl StateCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_states(states: Vec<State>) -> Self {
        Self {
            states,
            ..Self::default()
        }
    }

    pub fn push_state(&mut self, state: State) -> StateId {
        self.states.push(state);
        StateId(self.states.len() - 1)
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(id.0)
    }

    pub fn state_mut(&mut self, id: StateId) -> Option<&mut State> {
        self.states.get_mut(id.0)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.0)
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id.0)
    }

    /// Ids of every state in collection order.
    pub fn state_ids(&self) -> Vec<StateId> {
        (0..self.states.len()).map(StateId).collect()
    }

    /// Find a state by its record id.
    pub fn find_state(&self, id: &str) -> Option<StateId> {
        self.states
            .iter()
            .position(|state| state.id == id)
            .map(StateId)
    }

    pub fn is_materialized(&self, grouping_name: &str) -> bool {
        self.groupings.contains_key(grouping_name)
    }

    pub fn grouping(&self, grouping_name: &str) -> Option<&Grouping> {
        self.groupings.get(grouping_name)
    }

    pub fn entity(&self, entity: EntityRef) -> Option<Entity<'_>> {
        match entity {
            EntityRef::State(id) => self.state(id).map(Entity::State),
            EntityRef::Group(id) => self.group(id).map(Entity::Group),
        }
    }

    /// Mutable `measures` map of an entity.
    pub fn measures_mut(&mut self, entity: EntityRef) -> Option<&mut Fields> {
        match entity {
            EntityRef::State(id) => self.state_mut(id).map(|state| &mut state.measures),
            EntityRef::Group(id) => self.group_mut(id).map(|group| &mut group.measures),
        }
    }

    /// Mutable `meta` map of an entity.
    pub fn meta_mut(&mut self, entity: EntityRef) -> Option<&mut Fields> {
        match entity {
            EntityRef::State(id) => self.state_mut(id).map(|state| &mut state.meta),
            EntityRef::Group(id) => self.group_mut(id).map(|group| &mut group.meta),
        }
    }
}
