//! Multi-key hierarchical sort over states and groups.
//!
//! A sort spec is an ordered list of [`SortKey`]s. Each key expands into one
//! or more single-field passes; the passes are applied as stable sorts in
//! reverse declared order, so the first declared key dominates and ties fall
//! through to later keys.
//!
//! Keys deserialize from `[category, selector]` pairs:
//!
//! ```toml
//! sort = [
//!     ["-measure", "score"],
//!     ["data", ["x", "y"]],
//!     ["groupings", { grouping = "by_user", index = 0, keys = [["meta", "joined"]] }],
//! ]
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::core::model::{Category, Entity, GroupId, StateCollection, StateId};

/// Category plus direction, written `measure` or `-measure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOrder {
    pub category: Category,
    pub descending: bool,
}

impl FieldOrder {
    pub fn ascending(category: Category) -> Self {
        Self {
            category,
            descending: false,
        }
    }

    pub fn descending(category: Category) -> Self {
        Self {
            category,
            descending: true,
        }
    }
}

impl FromStr for FieldOrder {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let category = match name {
            "data" => Category::Data,
            "measure" | "measures" => Category::Measure,
            "meta" => Category::Meta,
            other => return Err(format!("unknown sort category '{other}'")),
        };
        Ok(Self {
            category,
            descending,
        })
    }
}

/// One category/direction applied to an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKey {
    pub order: FieldOrder,
    pub fields: Vec<String>,
}

impl FieldKey {
    pub fn new(order: FieldOrder, fields: &[&str]) -> Self {
        Self {
            order,
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }
}

/// A declared sort key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSortKey")]
pub enum SortKey {
    /// Fields of the entity itself.
    Fields(FieldKey),
    /// Fields of the `index`-th group the state belongs to in `grouping`.
    Grouping {
        grouping: String,
        index: usize,
        keys: Vec<FieldKey>,
    },
}

impl SortKey {
    pub fn ascending(category: Category, field: &str) -> Self {
        SortKey::Fields(FieldKey::new(FieldOrder::ascending(category), &[field]))
    }

    pub fn descending(category: Category, field: &str) -> Self {
        SortKey::Fields(FieldKey::new(FieldOrder::descending(category), &[field]))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFields {
    One(String),
    Many(Vec<String>),
}

impl From<RawFields> for Vec<String> {
    fn from(raw: RawFields) -> Self {
        match raw {
            RawFields::One(field) => vec![field],
            RawFields::Many(fields) => fields,
        }
    }
}

#[derive(Deserialize)]
struct RawGroupingSelector {
    grouping: String,
    #[serde(default)]
    index: usize,
    keys: Vec<(String, RawFields)>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Fields(RawFields),
    Grouping(RawGroupingSelector),
}

#[derive(Deserialize)]
struct RawSortKey(String, RawSelector);

impl TryFrom<RawSortKey> for SortKey {
    type Error = String;

    fn try_from(RawSortKey(category, selector): RawSortKey) -> Result<Self, Self::Error> {
        match (category.as_str(), selector) {
            ("groupings", RawSelector::Grouping(raw)) => {
                let keys = raw
                    .keys
                    .into_iter()
                    .map(|(order, fields)| {
                        Ok(FieldKey {
                            order: order.parse()?,
                            fields: fields.into(),
                        })
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                Ok(SortKey::Grouping {
                    grouping: raw.grouping,
                    index: raw.index,
                    keys,
                })
            }
            ("groupings", RawSelector::Fields(_)) => {
                Err("groupings sort key needs a { grouping, keys } selector".to_string())
            }
            (_, RawSelector::Grouping(_)) => Err(format!(
                "sort category '{category}' takes a field name or list of field names"
            )),
            (order, RawSelector::Fields(fields)) => Ok(SortKey::Fields(FieldKey {
                order: order.parse()?,
                fields: fields.into(),
            })),
        }
    }
}

/// Field value used for ordering; `Missing` sorts below every value.
#[derive(Debug, Clone, Copy)]
pub enum SortValue<'a> {
    Missing,
    Value(&'a Value),
}

impl<'a> From<Option<&'a Value>> for SortValue<'a> {
    fn from(value: Option<&'a Value>) -> Self {
        value.map_or(SortValue::Missing, SortValue::Value)
    }
}

impl PartialEq for SortValue<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortValue<'_> {}

impl PartialOrd for SortValue<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortValue<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Missing, SortValue::Missing) => Ordering::Equal,
            (SortValue::Missing, SortValue::Value(_)) => Ordering::Less,
            (SortValue::Value(_), SortValue::Missing) => Ordering::Greater,
            (SortValue::Value(a), SortValue::Value(b)) => compare_values(a, b),
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: `null < bool < number < string < array < object`.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x.cmp(&y)
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x.cmp(&y)
            } else if x.is_i64() && y.is_u64() {
                // Negative against above `i64::MAX`.
                Ordering::Less
            } else if x.is_u64() && y.is_i64() {
                Ordering::Greater
            } else {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| compare_values(x, y))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((xk, xv), (yk, yv))| xk.cmp(yk).then_with(|| compare_values(xv, yv)))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// One resolved single-field pass.
#[derive(Debug, Clone, Copy)]
struct Pass<'a> {
    via: Option<(&'a str, usize)>,
    category: Category,
    descending: bool,
    field: &'a str,
}

impl fmt::Display for Pass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.descending { "-" } else { "" };
        match self.via {
            Some((grouping, index)) => write!(
                f,
                "groupings[{grouping}][{index}].{sign}{}:{}",
                self.category, self.field
            ),
            None => write!(f, "{sign}{}:{}", self.category, self.field),
        }
    }
}

fn expand(spec: &[SortKey]) -> Vec<Pass<'_>> {
    let mut passes = Vec::new();
    for key in spec {
        let (via, field_keys) = match key {
            SortKey::Fields(field_key) => (None, std::slice::from_ref(field_key)),
            SortKey::Grouping {
                grouping,
                index,
                keys,
            } => (Some((grouping.as_str(), *index)), keys.as_slice()),
        };
        for field_key in field_keys {
            for field in &field_key.fields {
                passes.push(Pass {
                    via,
                    category: field_key.order.category,
                    descending: field_key.order.descending,
                    field,
                });
            }
        }
    }
    passes
}

fn stable_passes<'c, T: Copy>(
    items: &[T],
    spec: &[SortKey],
    value_of: impl Fn(T, &Pass<'_>) -> SortValue<'c>,
) -> Vec<T> {
    let mut sorted = items.to_vec();
    for pass in expand(spec).iter().rev() {
        tracing::trace!(pass = %pass, "sort pass");
        sorted.sort_by(|a, b| {
            let ordering = value_of(*a, pass).cmp(&value_of(*b, pass));
            if pass.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
    sorted
}

/// Order `states` by `spec`, returning a new sequence.
pub fn sort_states(
    collection: &StateCollection,
    states: &[StateId],
    spec: &[SortKey],
) -> Vec<StateId> {
    stable_passes(states, spec, |id, pass| state_value(collection, id, pass))
}

/// Order `groups` by `spec`; group-relative keys always evaluate as missing.
pub fn sort_groups(
    collection: &StateCollection,
    groups: &[GroupId],
    spec: &[SortKey],
) -> Vec<GroupId> {
    stable_passes(groups, spec, |id, pass| {
        if pass.via.is_some() {
            return SortValue::Missing;
        }
        collection
            .group(id)
            .and_then(|group| Entity::Group(group).field(pass.category, pass.field))
            .into()
    })
}

fn state_value<'c>(collection: &'c StateCollection, id: StateId, pass: &Pass<'_>) -> SortValue<'c> {
    let Some(state) = collection.state(id) else {
        return SortValue::Missing;
    };
    let entity = match pass.via {
        None => Some(Entity::State(state)),
        Some((grouping, index)) => state
            .memberships(grouping)
            .get(index)
            .and_then(|group| collection.group(*group))
            .map(Entity::Group),
    };
    entity
        .and_then(|entity| entity.field(pass.category, pass.field))
        .into()
}
