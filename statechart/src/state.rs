//! The runtime snapshot: where the machine is, its context, and what the
//! last macrostep produced.

use crate::node::{NodeId, TransitionDef};
use serde_json::{json, Value};
use statechart_core::{
    Action, Envelope, Event, HistoryValue, InvokeId, InvokeSource, MachineError, StateId,
    StateValue,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A state produced by the machine. Always a freshly constructed value;
/// the previous state is never mutated.
#[derive(Debug, Clone)]
pub struct State {
    /// The state-value tree derived from the configuration.
    pub value: StateValue,
    /// The machine context after this macrostep.
    pub context: Value,
    /// The user-visible event that produced this state. Eventless
    /// microsteps preserve the previous event.
    pub event: Event,
    /// The full `_event` envelope.
    pub envelope: Envelope,
    /// Actions for the interpreter to perform, in occurrence order.
    pub actions: Vec<Action>,
    /// Active nodes, in document order.
    pub configuration: Vec<NodeId>,
    /// The transitions that produced this state.
    pub transitions: Vec<TransitionDef>,
    /// Recorded history, updated on exits.
    pub history_value: HistoryValue,
    /// The previous state. The link is one deep: the stored state's own
    /// `history` is cleared to keep the chain bounded.
    pub history: Option<Box<State>>,
    /// Running invocations: invoke id → source descriptor. The interpreter
    /// owns the live handles.
    pub children: BTreeMap<InvokeId, InvokeSource>,
    /// Union of the active nodes' tags.
    pub tags: BTreeSet<String>,
    /// Metadata of active nodes that declare any, keyed by node id.
    pub meta: BTreeMap<StateId, Value>,
    /// Whether the macrostep changed value, context, or produced actions.
    /// `None` for initial and rehydrated states.
    pub changed: Option<bool>,
    /// True iff the root is in a final configuration.
    pub done: bool,
    /// Events raised during the macrostep, drained by the driver.
    pub(crate) internal_queue: VecDeque<Envelope>,
}

impl State {
    /// True when this state's value satisfies the delimited path, e.g.
    /// `state.matches("red.walk")`.
    pub fn matches(&self, path: &str) -> bool {
        self.value.matches(&StateValue::from_path(path, '.'))
    }

    /// True when any active node carries the tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Undrained internal events. Nonzero only when a macrostep ended
    /// early on a final state.
    pub fn internal_queue_len(&self) -> usize {
        self.internal_queue.len()
    }

    /// Serialize the persistable parts of the state: value, context, the
    /// triggering event, recorded history, and the done flag.
    pub fn to_json(&self) -> Value {
        let history: BTreeMap<String, Vec<String>> = self
            .history_value
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    v.iter().map(|id| id.to_string()).collect(),
                )
            })
            .collect();
        json!({
            "value": self.value,
            "context": self.context,
            "event": { "name": self.event.name, "data": self.event.data },
            "historyValue": history,
            "done": self.done,
        })
    }

    /// Rebuild a state from [`State::to_json`] output. The result is
    /// unresolved — its configuration is empty until it passes through
    /// `Machine::resolve_state` (or `Interpreter::start_with`).
    pub fn create(snapshot: Value) -> Result<State, MachineError> {
        let value: StateValue = serde_json::from_value(
            snapshot
                .get("value")
                .cloned()
                .ok_or_else(|| MachineError::UnknownState("snapshot has no value".into()))?,
        )
        .map_err(|e| MachineError::UnknownState(format!("bad snapshot value: {e}")))?;

        let context = snapshot.get("context").cloned().unwrap_or(Value::Null);
        let event = match snapshot.get("event") {
            Some(ev) => Event::with_data(
                ev.get("name").and_then(Value::as_str).unwrap_or_default(),
                ev.get("data").cloned().unwrap_or(Value::Null),
            ),
            None => Event::new(statechart_core::event::names::INIT),
        };
        let mut history_value = HistoryValue::new();
        if let Some(map) = snapshot.get("historyValue").and_then(Value::as_object) {
            for (key, ids) in map {
                let recorded = ids
                    .as_array()
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(StateId::new)
                            .collect()
                    })
                    .unwrap_or_default();
                history_value.insert(StateId::new(key.clone()), recorded);
            }
        }
        let done = snapshot
            .get("done")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(State {
            envelope: Envelope::external(event.clone()),
            value,
            context,
            event,
            actions: Vec::new(),
            configuration: Vec::new(),
            transitions: Vec::new(),
            history_value,
            history: None,
            children: BTreeMap::new(),
            tags: BTreeSet::new(),
            meta: BTreeMap::new(),
            changed: None,
            done,
            internal_queue: VecDeque::new(),
        })
    }
}
