//! Action descriptors — side-effects declared by the machine, resolved by
//! the pure layer, executed by the interpreter.
//!
//! An [`Action`] is NOT executed where it is declared. The machine's
//! transition function resolves descriptors against the current context and
//! event (applying `assign` immediately, expanding `pure`/`choose`,
//! concretizing `send`/`log` expressions) and the interpreter performs the
//! remaining effects after the macrostep. This split is what keeps the
//! transition function pure and the machine value testable without a
//! runtime.

use crate::error::ActionError;
use crate::event::{Envelope, Event};
use crate::guard::Guard;
use crate::id::{InvokeId, SendId};
use crate::invoke::InvokeDef;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

macro_rules! opaque_debug {
    ($name:ident) => {
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!("<", stringify!($name), ">"))
            }
        }
    };
}

/// Context updater: returns a partial object merged into the context.
#[derive(Clone)]
pub struct AssignFn(Arc<dyn Fn(&Value, &Envelope) -> Result<Value, ActionError> + Send + Sync>);
opaque_debug!(AssignFn);

impl AssignFn {
    /// Wrap an updater closure.
    pub fn new(
        f: impl Fn(&Value, &Envelope) -> Result<Value, ActionError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Apply the updater.
    pub fn call(&self, context: &Value, event: &Envelope) -> Result<Value, ActionError> {
        (self.0)(context, event)
    }
}

/// Maps context + event to a JSON value (log lines, payload mappers).
#[derive(Clone)]
pub struct ExprFn(Arc<dyn Fn(&Value, &Envelope) -> Value + Send + Sync>);
opaque_debug!(ExprFn);

impl ExprFn {
    /// Wrap an expression closure.
    pub fn new(f: impl Fn(&Value, &Envelope) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluate the expression.
    pub fn call(&self, context: &Value, event: &Envelope) -> Value {
        (self.0)(context, event)
    }
}

/// Opaque side-effect, deferred to the interpreter.
#[derive(Clone)]
pub struct ExecFn(Arc<dyn Fn(&Value, &Envelope) + Send + Sync>);
opaque_debug!(ExecFn);

impl ExecFn {
    /// Wrap an effect closure.
    pub fn new(f: impl Fn(&Value, &Envelope) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Run the effect.
    pub fn call(&self, context: &Value, event: &Envelope) {
        (self.0)(context, event)
    }
}

/// Factory expanding into further actions based on the context snapshot.
#[derive(Clone)]
pub struct PureFn(Arc<dyn Fn(&Value, &Envelope) -> Vec<Action> + Send + Sync>);
opaque_debug!(PureFn);

impl PureFn {
    /// Wrap a factory closure.
    pub fn new(f: impl Fn(&Value, &Envelope) -> Vec<Action> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Expand the factory.
    pub fn call(&self, context: &Value, event: &Envelope) -> Vec<Action> {
        (self.0)(context, event)
    }
}

/// Maps context + event to an event to send.
#[derive(Clone)]
pub struct EventFn(Arc<dyn Fn(&Value, &Envelope) -> Event + Send + Sync>);
opaque_debug!(EventFn);

impl EventFn {
    /// Wrap an event-expression closure.
    pub fn new(f: impl Fn(&Value, &Envelope) -> Event + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluate the event expression.
    pub fn call(&self, context: &Value, event: &Envelope) -> Event {
        (self.0)(context, event)
    }
}

/// Named delay expression: milliseconds from context + event.
#[derive(Clone)]
pub struct DelayFn(Arc<dyn Fn(&Value, &Envelope) -> u64 + Send + Sync>);
opaque_debug!(DelayFn);

impl DelayFn {
    /// Wrap a delay closure.
    pub fn new(f: impl Fn(&Value, &Envelope) -> u64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluate the delay, in milliseconds.
    pub fn call(&self, context: &Value, event: &Envelope) -> u64 {
        (self.0)(context, event)
    }
}

/// An event to send: a literal, or an expression evaluated at resolution
/// time. The resolver always concretizes to a literal.
#[derive(Debug, Clone)]
pub enum EventExpr {
    /// A literal event.
    Literal(Event),
    /// Evaluated against context + triggering event.
    Expr(EventFn),
}

impl EventExpr {
    /// Concretize against the current context and event.
    pub fn resolve(&self, context: &Value, event: &Envelope) -> Event {
        match self {
            EventExpr::Literal(ev) => ev.clone(),
            EventExpr::Expr(f) => f.call(context, event),
        }
    }
}

/// A JSON payload: literal or expression. The resolver concretizes.
#[derive(Debug, Clone)]
pub enum ValueExpr {
    /// A literal value.
    Literal(Value),
    /// Evaluated against context + triggering event.
    Expr(ExprFn),
}

impl ValueExpr {
    /// Concretize against the current context and event.
    pub fn resolve(&self, context: &Value, event: &Envelope) -> Value {
        match self {
            ValueExpr::Literal(v) => v.clone(),
            ValueExpr::Expr(f) => f.call(context, event),
        }
    }
}

/// A send delay: literal milliseconds, or a name resolved through the
/// machine's delay registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelaySpec {
    /// Milliseconds.
    Ms(u64),
    /// A registered delay-expression name.
    Named(String),
}

impl DelaySpec {
    /// The textual reference used when minting `after` event names.
    pub fn reference(&self) -> String {
        match self {
            DelaySpec::Ms(ms) => ms.to_string(),
            DelaySpec::Named(name) => name.clone(),
        }
    }
}

impl From<u64> for DelaySpec {
    fn from(ms: u64) -> Self {
        DelaySpec::Ms(ms)
    }
}

impl From<&str> for DelaySpec {
    fn from(name: &str) -> Self {
        DelaySpec::Named(name.to_owned())
    }
}

/// Where a send is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    /// Re-route as a raise (the `#_internal` target).
    Internal,
    /// The sending interpreter's own external queue. The default.
    SelfActor,
    /// The parent interpreter.
    Parent,
    /// A child actor, by invocation id.
    Child(String),
}

/// A send descriptor: event, routing, delay, and cancellation id.
#[derive(Debug, Clone)]
pub struct SendSpec {
    /// What to send.
    pub event: EventExpr,
    /// Routing; `None` means self.
    pub to: Option<SendTarget>,
    /// Delay before delivery; `None` is immediate.
    pub delay: Option<DelaySpec>,
    /// Send id for later cancellation. Defaults to the event name.
    pub id: Option<SendId>,
}

impl SendSpec {
    /// A send of a literal event, immediate, to self.
    pub fn new(event: impl Into<Event>) -> Self {
        Self {
            event: EventExpr::Literal(event.into()),
            to: None,
            delay: None,
            id: None,
        }
    }

    /// A send whose event is computed at resolution time.
    pub fn expr(f: impl Fn(&Value, &Envelope) -> Event + Send + Sync + 'static) -> Self {
        Self {
            event: EventExpr::Expr(EventFn::new(f)),
            to: None,
            delay: None,
            id: None,
        }
    }

    /// Route the send.
    pub fn to(mut self, target: SendTarget) -> Self {
        self.to = Some(target);
        self
    }

    /// Delay delivery.
    pub fn delay(mut self, delay: impl Into<DelaySpec>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    /// Set the send id used for cancellation.
    pub fn id(mut self, id: impl Into<SendId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl From<SendSpec> for Action {
    fn from(spec: SendSpec) -> Self {
        Action::Send(spec)
    }
}

/// One arm of a `choose` action.
#[derive(Debug, Clone)]
pub struct ChooseBranch {
    /// Branch guard; `None` always passes (the `otherwise` arm).
    pub guard: Option<Guard>,
    /// Actions resolved when the branch is taken.
    pub actions: Vec<Action>,
}

/// Which child to stop: a literal invocation id, or an expression
/// evaluating to one.
#[derive(Debug, Clone)]
pub enum StopRef {
    /// A literal invocation id.
    Id(InvokeId),
    /// Evaluates to the id string.
    Expr(ExprFn),
}

/// A declared side-effect. See the module docs for the resolution split.
#[derive(Debug, Clone)]
pub enum Action {
    /// Update the context through an updater.
    Assign(AssignFn),
    /// Enqueue an internal event for this macrostep.
    Raise(Event),
    /// Send an event (self, parent, child), possibly delayed.
    Send(SendSpec),
    /// Cancel a scheduled send by id.
    Cancel(SendId),
    /// Emit a log line through the interpreter.
    Log {
        /// Optional label prefix.
        label: Option<String>,
        /// The message payload.
        message: ValueExpr,
    },
    /// Expand into further actions from the current context snapshot.
    Pure(PureFn),
    /// Resolve the first branch whose guard passes.
    Choose(Vec<ChooseBranch>),
    /// Start a child actor. Synthesized by the compiler on state entry.
    Invoke(InvokeDef),
    /// Stop a child actor.
    Stop(StopRef),
    /// Send an `error.platform` event to the parent interpreter.
    Escalate(ValueExpr),
    /// A user-defined action, resolved through the action registry and/or
    /// executed through its `exec` effect.
    Custom {
        /// Registry name.
        name: String,
        /// Deferred effect; `None` for registry-only references.
        exec: Option<ExecFn>,
    },
}

impl Action {
    /// The action's kind, for diagnostics and error events.
    pub fn kind(&self) -> &str {
        match self {
            Action::Assign(_) => "assign",
            Action::Raise(_) => "raise",
            Action::Send(_) => "send",
            Action::Cancel(_) => "cancel",
            Action::Log { .. } => "log",
            Action::Pure(_) => "pure",
            Action::Choose(_) => "choose",
            Action::Invoke(_) => "invoke",
            Action::Stop(_) => "stop",
            Action::Escalate(_) => "escalate",
            Action::Custom { name, .. } => name,
        }
    }
}

/// Builder functions for the action vocabulary.
pub mod actions {
    use super::*;

    /// `assign` from an infallible updater returning a partial object.
    pub fn assign(f: impl Fn(&Value, &Envelope) -> Value + Send + Sync + 'static) -> Action {
        Action::Assign(AssignFn::new(move |ctx, ev| Ok(f(ctx, ev))))
    }

    /// `assign` from a fallible updater.
    pub fn try_assign(
        f: impl Fn(&Value, &Envelope) -> Result<Value, ActionError> + Send + Sync + 'static,
    ) -> Action {
        Action::Assign(AssignFn::new(f))
    }

    /// `raise` an internal event.
    pub fn raise(event: impl Into<Event>) -> Action {
        Action::Raise(event.into())
    }

    /// Begin a `send`; chain `.to()`, `.delay()`, `.id()` and pass the spec
    /// where an action is expected.
    pub fn send(event: impl Into<Event>) -> SendSpec {
        SendSpec::new(event)
    }

    /// A `send` routed to the parent interpreter.
    pub fn send_parent(event: impl Into<Event>) -> SendSpec {
        SendSpec::new(event).to(SendTarget::Parent)
    }

    /// `cancel` a scheduled send.
    pub fn cancel(id: impl Into<SendId>) -> Action {
        Action::Cancel(id.into())
    }

    /// `log` a fixed message.
    pub fn log_msg(message: impl Into<String>) -> Action {
        Action::Log {
            label: None,
            message: ValueExpr::Literal(Value::String(message.into())),
        }
    }

    /// `log` an expression, with a label.
    pub fn log(
        label: impl Into<String>,
        f: impl Fn(&Value, &Envelope) -> Value + Send + Sync + 'static,
    ) -> Action {
        Action::Log {
            label: Some(label.into()),
            message: ValueExpr::Expr(ExprFn::new(f)),
        }
    }

    /// `pure`: expand into further actions lazily.
    pub fn pure(f: impl Fn(&Value, &Envelope) -> Vec<Action> + Send + Sync + 'static) -> Action {
        Action::Pure(PureFn::new(f))
    }

    /// `choose` among guarded branches.
    pub fn choose(branches: Vec<ChooseBranch>) -> Action {
        Action::Choose(branches)
    }

    /// A guarded `choose` branch.
    pub fn when(guard: Guard, actions: Vec<Action>) -> ChooseBranch {
        ChooseBranch {
            guard: Some(guard),
            actions,
        }
    }

    /// The unguarded fallback branch.
    pub fn otherwise(actions: Vec<Action>) -> ChooseBranch {
        ChooseBranch {
            guard: None,
            actions,
        }
    }

    /// `stop` a child actor by invocation id.
    pub fn stop_child(id: impl Into<InvokeId>) -> Action {
        Action::Stop(StopRef::Id(id.into()))
    }

    /// `escalate` a literal error payload to the parent.
    pub fn escalate(data: impl Into<Value>) -> Action {
        Action::Escalate(ValueExpr::Literal(data.into()))
    }

    /// `escalate` a computed error payload.
    pub fn escalate_with(
        f: impl Fn(&Value, &Envelope) -> Value + Send + Sync + 'static,
    ) -> Action {
        Action::Escalate(ValueExpr::Expr(ExprFn::new(f)))
    }

    /// A named action resolved through the machine's action registry.
    pub fn named(name: impl Into<String>) -> Action {
        Action::Custom {
            name: name.into(),
            exec: None,
        }
    }

    /// A user action with an inline effect.
    pub fn effect(
        name: impl Into<String>,
        f: impl Fn(&Value, &Envelope) + Send + Sync + 'static,
    ) -> Action {
        Action::Custom {
            name: name.into(),
            exec: Some(ExecFn::new(f)),
        }
    }
}
