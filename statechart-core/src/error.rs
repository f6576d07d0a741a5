//! Error types for each layer of the runtime.

use crate::id::StateId;
use thiserror::Error;

/// Machine construction and transition errors. Construction errors are
/// fatal; transition errors surface from `transition` and are handled by
/// the interpreter according to strict mode.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MachineError {
    /// A compound state did not declare an initial child.
    #[error("compound state '{state}' has no initial state")]
    MissingInitial {
        /// The offending state.
        state: StateId,
    },

    /// An initial target is not a descendant of its state.
    #[error("initial target '{target}' of '{state}' is not a descendant")]
    InitialNotDescendant {
        /// The state declaring the initial target.
        state: StateId,
        /// The target as written in the config.
        target: String,
    },

    /// Two nodes resolved to the same id.
    #[error("duplicate state id: {0}")]
    DuplicateId(StateId),

    /// A transition target could not be resolved.
    #[error("cannot resolve target '{target}' from state '{source_state}'")]
    UnknownTarget {
        /// The transition's source state.
        source_state: StateId,
        /// The target as written in the config.
        target: String,
    },

    /// A state id or key lookup failed at runtime.
    #[error("unknown state: {0}")]
    UnknownState(String),

    /// A named guard was not found in the guard registry.
    #[error("unknown guard: {0}")]
    UnknownGuard(String),

    /// A named delay was not found in the delay registry.
    #[error("unknown delay: {0}")]
    UnknownDelay(String),

    /// A wildcard token appeared anywhere but the final position.
    #[error("invalid event descriptor '{descriptor}' on state '{state}'")]
    InvalidEventDescriptor {
        /// The state declaring the transition.
        state: StateId,
        /// The offending descriptor.
        descriptor: String,
    },

    /// Strict mode: the event selected no transitions.
    #[error("unhandled event in strict mode: '{0}'")]
    UnhandledEvent(String),

    /// Strict mode: an error event was not handled by any transition.
    #[error("unhandled error event in strict mode: '{event}': {data}")]
    UnhandledError {
        /// The error event name.
        event: String,
        /// The error payload, rendered for the message.
        data: String,
    },

    /// A guard evaluation error, propagated out of transition selection.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Guard evaluation errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GuardError {
    /// A user guard reported failure. Rewrapped into [`GuardError::Evaluation`]
    /// by the transition algebra before it propagates.
    #[error("{0}")]
    Failed(String),

    /// A guard failed during candidate selection, with its surroundings.
    #[error("guard '{guard}' failed on event '{event}' in state '{source_state}': {message}")]
    Evaluation {
        /// The guard's name or kind.
        guard: String,
        /// The event under selection.
        event: String,
        /// The transition's source state.
        source_state: StateId,
        /// The underlying failure.
        message: String,
    },

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Action resolution/execution errors. These do not propagate: the resolver
/// turns them into `error.execution` events.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ActionError {
    /// A user updater or effect reported failure.
    #[error("{0}")]
    Failed(String),

    /// An action failed during resolution.
    #[error("action '{action}' failed: {message}")]
    Execution {
        /// The action kind or name.
        action: String,
        /// The underlying failure.
        message: String,
    },

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Interpreter lifecycle errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ActorError {
    /// No behavior factory registered for an invoke source kind.
    #[error("unknown actor kind: {0}")]
    UnknownActorKind(String),

    /// The interpreter stopped due to an unhandled machine error.
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The interpreter is stopped and can no longer be driven.
    #[error("interpreter is stopped")]
    Stopped,

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
