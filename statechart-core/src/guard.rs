//! Guard descriptors and built-in combinators.

use crate::error::GuardError;
use crate::event::Envelope;
use crate::value::StateValue;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// What a guard observes: the context, the triggering event envelope, the
/// current state value, and (for named guards) its registered parameters.
///
/// Guards are pure with respect to these inputs; they never see a state
/// mid-microstep.
pub struct GuardContext<'a> {
    /// The machine context.
    pub context: &'a Value,
    /// The triggering event envelope (`_event`).
    pub event: &'a Envelope,
    /// The current state value, for containment checks.
    pub state_value: &'a StateValue,
    /// Parameters of the named guard under evaluation; `Value::Null` for
    /// inline guards.
    pub params: &'a Value,
}

/// A guard implementation.
#[derive(Clone)]
pub struct GuardFn(Arc<dyn Fn(&GuardContext<'_>) -> Result<bool, GuardError> + Send + Sync>);

impl GuardFn {
    /// Wrap an infallible predicate.
    pub fn from_fn(f: impl Fn(&GuardContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |ctx| Ok(f(ctx))))
    }

    /// Wrap a fallible predicate.
    pub fn try_from_fn(
        f: impl Fn(&GuardContext<'_>) -> Result<bool, GuardError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Evaluate the guard.
    pub fn call(&self, ctx: &GuardContext<'_>) -> Result<bool, GuardError> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for GuardFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<GuardFn>")
    }
}

/// A guard descriptor: built-ins, boolean combinators, registry references,
/// and inline predicates.
#[derive(Debug, Clone)]
pub enum Guard {
    /// True iff the current configuration satisfies the partial state value.
    In(StateValue),
    /// All child guards pass.
    And(Vec<Guard>),
    /// Any child guard passes.
    Or(Vec<Guard>),
    /// The child guard fails.
    Not(Box<Guard>),
    /// A guard resolved through the machine's guard registry.
    Named {
        /// Registry name.
        name: String,
        /// Parameters handed to the implementation.
        params: Value,
    },
    /// An inline predicate.
    Inline(GuardFn),
}

impl Guard {
    /// The guard's kind or name, for error rewrapping.
    pub fn kind(&self) -> &str {
        match self {
            Guard::In(_) => "in",
            Guard::And(_) => "and",
            Guard::Or(_) => "or",
            Guard::Not(_) => "not",
            Guard::Named { name, .. } => name,
            Guard::Inline(_) => "<inline>",
        }
    }
}

/// Builder functions for guards.
pub mod guards {
    use super::*;

    /// `state_in` over a delimited path from the machine root, e.g.
    /// `"B.B3"`.
    pub fn state_in(path: &str) -> Guard {
        Guard::In(StateValue::from_path(path, '.'))
    }

    /// `state_in` over an explicit partial state value.
    pub fn state_in_value(value: StateValue) -> Guard {
        Guard::In(value)
    }

    /// Conjunction.
    pub fn and(guards: Vec<Guard>) -> Guard {
        Guard::And(guards)
    }

    /// Disjunction.
    pub fn or(guards: Vec<Guard>) -> Guard {
        Guard::Or(guards)
    }

    /// Negation.
    pub fn not(guard: Guard) -> Guard {
        Guard::Not(Box::new(guard))
    }

    /// A registry reference.
    pub fn named(name: impl Into<String>) -> Guard {
        Guard::Named {
            name: name.into(),
            params: Value::Null,
        }
    }

    /// A registry reference with parameters.
    pub fn named_with(name: impl Into<String>, params: Value) -> Guard {
        Guard::Named {
            name: name.into(),
            params,
        }
    }

    /// An inline predicate over context and event.
    pub fn from_fn(
        f: impl Fn(&Value, &Envelope) -> bool + Send + Sync + 'static,
    ) -> Guard {
        Guard::Inline(GuardFn::from_fn(move |ctx| f(ctx.context, ctx.event)))
    }

    /// An inline fallible predicate with full guard context.
    pub fn try_from_fn(
        f: impl Fn(&GuardContext<'_>) -> Result<bool, GuardError> + Send + Sync + 'static,
    ) -> Guard {
        Guard::Inline(GuardFn::try_from_fn(f))
    }
}
