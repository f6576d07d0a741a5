//! # statechart — the machine layer
//!
//! Compiles a declarative [`MachineConfig`] into an immutable [`Machine`]
//! and implements the pure transition function over it, faithful to the
//! SCXML algorithm:
//!
//! - [`config`] — the declarative definition tree
//! - [`node`] — the compiled node arena (ids, document order, normalized
//!   transitions, `after` rewrites)
//! - transition algebra — wildcard/token matching, candidate selection,
//!   conflict removal
//! - microstep engine — exit/entry sets, LCCA, history, done events
//! - macrostep driver — internal-queue draining and eventless closure
//! - [`state`] — the immutable runtime snapshot and its JSON round trip
//!
//! Everything here is synchronous and effect-free: actions come back as
//! descriptors on the [`State`] for an interpreter to perform. The tokio
//! interpreter lives in the `statechart-interpreter` crate.
//!
//! ```
//! use statechart::{Machine, MachineConfig, StateConfig};
//!
//! let machine = Machine::new(
//!     MachineConfig::new("toggle").state(
//!         StateConfig::new()
//!             .initial("off")
//!             .child("off", StateConfig::new().on("TOGGLE", "on"))
//!             .child("on", StateConfig::new().on("TOGGLE", "off")),
//!     ),
//! )
//! .unwrap();
//!
//! let state = machine.initial_state().unwrap();
//! let state = machine.transition(&state, "TOGGLE").unwrap();
//! assert!(state.matches("on"));
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod machine;
mod macrostep;
mod microstep;
pub mod node;
mod resolve;
pub mod state;
mod transition;

pub use config::{ConfigKind, InvokeConfig, MachineConfig, StateConfig, TransitionConfig};
pub use machine::{Machine, MachineOptions};
pub use node::{NodeId, NodeKind, StateNode, TransitionDef};
pub use state::State;
pub use transition::event_descriptor_matches;

// The shared protocol vocabulary, re-exported for single-import use.
pub use statechart_core::{
    action::actions, guard::guards, Action, ActorId, DelaySpec, Envelope, Event, EventKind,
    Guard, GuardFn, HistoryKind, HistoryValue, InvokeId, InvokeSource, MachineError, SendId,
    SendTarget, StateId, StateValue,
};
