//! # statechart-core — protocol types for the statechart runtime
//!
//! This crate defines the data model shared by the pure machine layer
//! (`statechart`) and the actor layer (`statechart-interpreter`):
//!
//! | Concern | Types |
//! |---------|-------|
//! | Identity | [`StateId`], [`SendId`], [`InvokeId`], [`ActorId`] |
//! | Events | [`Event`], [`Envelope`], [`EventKind`], [`event::names`] |
//! | Location | [`StateValue`], [`HistoryValue`], [`HistoryKind`] |
//! | Effects | [`Action`] and the builder functions in [`action::actions`] |
//! | Conditions | [`Guard`], [`GuardFn`], builders in [`guard::guards`] |
//! | Children | [`InvokeDef`], [`InvokeSource`], [`Behavior`], [`ActorContext`] |
//! | Failures | [`MachineError`], [`GuardError`], [`ActionError`], [`ActorError`] |
//!
//! ## Design Principle
//!
//! Descriptors declare, the runtime performs. An [`Action`] or [`Guard`] is
//! a value describing what should happen; the pure layer resolves it and
//! the interpreter executes it. Keeping the vocabulary in a dependency-free
//! crate is what lets the machine be tested without an async runtime and
//! the interpreter be swapped without touching machine definitions.
//!
//! ## Dependency Notes
//!
//! Context, payloads, and snapshots are `serde_json::Value`. JSON is the
//! interchange format for machine definitions and persisted states, and
//! `Value` keeps the registries and the [`Behavior`] trait object-safe;
//! generifying over a user context type would complicate every seam for
//! little practical benefit.

#![deny(missing_docs)]

pub mod action;
pub mod behavior;
pub mod error;
pub mod event;
pub mod guard;
pub mod id;
pub mod invoke;
pub mod value;

// Re-exports for convenience
pub use action::{
    Action, AssignFn, ChooseBranch, DelayFn, DelaySpec, EventExpr, EventFn, ExecFn, ExprFn,
    PureFn, SendSpec, SendTarget, StopRef, ValueExpr,
};
pub use behavior::{ActorContext, Behavior, BehaviorFactory};
pub use error::{ActionError, ActorError, GuardError, MachineError};
pub use event::{Envelope, Event, EventKind};
pub use guard::{Guard, GuardContext, GuardFn};
pub use id::{ActorId, InvokeId, SendId, StateId};
pub use invoke::{InvokeDef, InvokeSource};
pub use value::{HistoryKind, HistoryValue, StateValue};
