//! Events and the SCXML-style event envelope.

use crate::id::{ActorId, InvokeId, SendId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A user-facing event: a dotted name plus an arbitrary JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Dot-separated event name, e.g. `"FETCH"` or `"done.invoke.loader"`.
    pub name: String,
    /// Event payload. `Value::Null` when the event carries no data.
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Create an event with no payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Value::Null,
        }
    }

    /// Create an event carrying a payload.
    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Event::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Event::new(name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Origin class of an event, per the SCXML `_event.type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Sent from outside the machine (user code, timers, child actors).
    External,
    /// Raised within the machine during a macrostep.
    Internal,
    /// Generated by the runtime itself (init, done, after).
    Platform,
    /// An error event (`error.execution`, `error.platform.<id>`).
    Error,
}

/// The full event envelope bound to `_event` during a macrostep.
///
/// The envelope is what guards and expressions observe; the plain [`Event`]
/// is the user-visible projection (`state.event`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name. The empty string is the NULL (eventless) sentinel.
    pub name: String,
    /// Origin class.
    pub kind: EventKind,
    /// Send id, when the event was produced by a (possibly delayed) send.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub send_id: Option<SendId>,
    /// The actor that sent this event, when known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub origin: Option<ActorId>,
    /// The invocation that produced this event, for child-actor events.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub invoke_id: Option<InvokeId>,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Wrap an event as an external envelope.
    pub fn external(event: Event) -> Self {
        Self {
            name: event.name,
            kind: EventKind::External,
            send_id: None,
            origin: None,
            invoke_id: None,
            data: event.data,
        }
    }

    /// Wrap an event as an internal (raised) envelope.
    pub fn raised(event: Event) -> Self {
        Self {
            name: event.name,
            kind: EventKind::Internal,
            send_id: None,
            origin: None,
            invoke_id: None,
            data: event.data,
        }
    }

    /// A platform-generated envelope (init, done.*, after).
    pub fn platform(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Platform,
            send_id: None,
            origin: None,
            invoke_id: None,
            data,
        }
    }

    /// An error envelope (`error.execution`, `error.platform.<id>`).
    pub fn error(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Error,
            send_id: None,
            origin: None,
            invoke_id: None,
            data,
        }
    }

    /// The NULL sentinel that forces an eventless microstep.
    pub fn null() -> Self {
        Self {
            name: String::new(),
            kind: EventKind::Internal,
            send_id: None,
            origin: None,
            invoke_id: None,
            data: Value::Null,
        }
    }

    /// The synthetic initial event.
    pub fn init() -> Self {
        Self::platform(names::INIT, Value::Null)
    }

    /// True for the NULL (eventless) sentinel.
    pub fn is_null(&self) -> bool {
        self.name.is_empty()
    }

    /// Project the envelope back to a plain event.
    pub fn to_event(&self) -> Event {
        Event {
            name: self.name.clone(),
            data: self.data.clone(),
        }
    }

    /// Stamp the sender reference.
    pub fn with_origin(mut self, origin: ActorId) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Well-known event names produced by the runtime.
pub mod names {
    use crate::id::{InvokeId, StateId};

    /// Synthetic initial event.
    pub const INIT: &str = "statechart.init";

    /// Sync-mode nested-machine update, carrying the child state.
    pub const UPDATE: &str = "statechart.update";

    /// Raised when an assign/exec action fails.
    pub const ERROR_EXECUTION: &str = "error.execution";

    /// `done.invoke.<id>` — a child actor finished.
    pub fn done_invoke(id: &InvokeId) -> String {
        format!("done.invoke.{id}")
    }

    /// `error.platform.<id>` — a child actor failed or escalated.
    pub fn error_platform(id: &InvokeId) -> String {
        format!("error.platform.{id}")
    }

    /// `done.state.<id>` — a compound/parallel state reached a final substate.
    pub fn done_state(id: &StateId) -> String {
        format!("done.state.{id}")
    }

    /// `statechart.after(<ref>)#<sourceId>` — synthesized delayed event.
    pub fn after(delay_ref: &str, source: &StateId) -> String {
        format!("statechart.after({delay_ref})#{source}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::StateId;

    #[test]
    fn envelope_roundtrips_through_json() {
        let env = Envelope::external(Event::with_data("FETCH", serde_json::json!({"n": 1})))
            .with_origin(ActorId::new("parent"));
        let json = serde_json::to_value(&env).unwrap();
        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn null_sentinel_is_recognized() {
        assert!(Envelope::null().is_null());
        assert!(!Envelope::init().is_null());
    }

    #[test]
    fn well_known_names_have_expected_shapes() {
        assert_eq!(
            names::done_invoke(&InvokeId::new("loader")),
            "done.invoke.loader"
        );
        assert_eq!(
            names::after("100", &StateId::new("m.doing")),
            "statechart.after(100)#m.doing"
        );
    }
}
