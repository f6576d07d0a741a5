//! State values and history records.

use crate::id::StateId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// The shape of "where the machine is": an atomic leaf key, or a map from
/// child key to the child's own state value (compound and parallel states).
///
/// Serializes untagged, so `"idle"` and `{"a": {"b": "c"}}` round-trip as
/// plain JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// An atomic (or final) leaf, by key.
    Leaf(String),
    /// A compound or parallel region: child key → child value.
    Compound(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// A leaf value.
    pub fn leaf(key: impl Into<String>) -> Self {
        StateValue::Leaf(key.into())
    }

    /// A compound value from `(key, child)` pairs.
    pub fn compound<I, K>(children: I) -> Self
    where
        I: IntoIterator<Item = (K, StateValue)>,
        K: Into<String>,
    {
        StateValue::Compound(children.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Parse a delimited path (`"a.b.c"`) into a nested value
    /// (`{"a": {"b": "c"}}`).
    pub fn from_path(path: &str, delimiter: char) -> Self {
        let mut keys = path.split(delimiter).rev();
        let mut value = StateValue::Leaf(keys.next().unwrap_or_default().to_owned());
        for key in keys {
            value = StateValue::Compound(BTreeMap::from([(key.to_owned(), value)]));
        }
        value
    }

    /// True when this (full) value satisfies `partial`.
    ///
    /// A partial leaf matches an equal leaf, or names an active region of a
    /// compound value. A partial compound matches when every one of its
    /// entries is satisfied by the corresponding child.
    pub fn matches(&self, partial: &StateValue) -> bool {
        match (partial, self) {
            (StateValue::Leaf(p), StateValue::Leaf(v)) => p == v,
            (StateValue::Leaf(p), StateValue::Compound(children)) => children.contains_key(p),
            (StateValue::Compound(_), StateValue::Leaf(_)) => false,
            (StateValue::Compound(ps), StateValue::Compound(children)) => ps
                .iter()
                .all(|(key, pv)| children.get(key).is_some_and(|cv| cv.matches(pv))),
        }
    }
}

impl From<&str> for StateValue {
    fn from(key: &str) -> Self {
        StateValue::Leaf(key.to_owned())
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Leaf(key) => write!(f, "{key}"),
            StateValue::Compound(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}

/// Shallow vs. deep history recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Record the immediate children active at exit.
    Shallow,
    /// Record all atomic descendants active at exit.
    Deep,
}

/// Recorded history: history-node id → the state nodes recorded when the
/// node's parent was last exited.
pub type HistoryValue = HashMap<StateId, Vec<StateId>>;
