//! Invocation descriptors — child actors declared on state nodes.

use crate::action::ExprFn;
use crate::id::InvokeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What to invoke: a typed tag resolved through the machine's actor
/// registry, plus free-form parameters for the factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeSource {
    /// Actor-registry key (`"fetchUser"`, `"child-machine"`, …).
    pub kind: String,
    /// Factory parameters.
    #[serde(default)]
    pub params: Value,
}

impl InvokeSource {
    /// A source with no parameters.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Value::Null,
        }
    }

    /// A source with parameters.
    pub fn with_params(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

/// A compiled invocation: started when its node is entered, stopped when it
/// is exited. `on_done`/`on_error` handlers live in the node's transitions
/// (on `done.invoke.<id>` / `error.platform.<id>`), not here.
#[derive(Debug, Clone)]
pub struct InvokeDef {
    /// Invocation id; also the child's name in `state.children`.
    pub id: InvokeId,
    /// What to start.
    pub src: InvokeSource,
    /// Maps context + event to the child's input. `None` sends `Null`.
    pub input: Option<ExprFn>,
    /// Forward every external event the parent receives to this child.
    pub auto_forward: bool,
    /// Nested machines only: re-emit each child state change to the parent
    /// as a `statechart.update` event.
    pub sync: bool,
}

impl InvokeDef {
    /// A minimal invocation.
    pub fn new(id: impl Into<InvokeId>, src: InvokeSource) -> Self {
        Self {
            id: id.into(),
            src,
            input: None,
            auto_forward: false,
            sync: false,
        }
    }
}
