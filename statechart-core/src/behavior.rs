//! The child-actor protocol — the seam between the interpreter and
//! anything it can spawn.
//!
//! A [`Behavior`] is operation-defined: `run` means "be this child actor
//! until done or cancelled" — not "await a future" or "pump a stream".
//! A nested machine, a one-shot future, a callback loop, and an event
//! stream all implement the same trait, which is what lets the interpreter
//! manage them uniformly through [`ActorContext`] channels.

use crate::event::{names, Envelope, Event, EventKind};
use crate::id::{ActorId, InvokeId};
use crate::invoke::InvokeDef;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Everything a running child actor needs: identity, input, channels to and
/// from the parent, cooperative cancellation, and a snapshot slot.
pub struct ActorContext {
    /// The invocation id this actor was started under.
    pub id: InvokeId,
    /// The actor's own reference, stamped as `origin` on emitted events.
    pub actor_id: ActorId,
    /// Input computed by the invocation's data mapper.
    pub input: Value,
    /// Events to the parent interpreter's mailbox.
    pub to_parent: mpsc::UnboundedSender<Envelope>,
    /// Events the parent sends (or auto-forwards) to this actor.
    pub from_parent: mpsc::UnboundedReceiver<Envelope>,
    /// Cancelled when the parent stops this actor.
    pub cancel: CancellationToken,
    /// Latest observable snapshot, readable through the child handle.
    pub snapshot: watch::Sender<Value>,
}

impl ActorContext {
    /// Emit an event to the parent, stamped with this actor's origin.
    pub fn emit(&self, event: Event) {
        let envelope = Envelope {
            name: event.name,
            kind: EventKind::External,
            send_id: None,
            origin: Some(self.actor_id.clone()),
            invoke_id: Some(self.id.clone()),
            data: event.data,
        };
        let _ = self.to_parent.send(envelope);
    }

    /// Signal completion: `done.invoke.<id>` with the result payload.
    pub fn done(&self, data: Value) {
        let envelope = Envelope {
            name: names::done_invoke(&self.id),
            kind: EventKind::External,
            send_id: None,
            origin: Some(self.actor_id.clone()),
            invoke_id: Some(self.id.clone()),
            data,
        };
        let _ = self.to_parent.send(envelope);
    }

    /// Signal failure: `error.platform.<id>` with the error payload.
    pub fn fail(&self, data: Value) {
        let envelope = Envelope {
            name: names::error_platform(&self.id),
            kind: EventKind::Error,
            send_id: None,
            origin: Some(self.actor_id.clone()),
            invoke_id: Some(self.id.clone()),
            data,
        };
        let _ = self.to_parent.send(envelope);
    }
}

impl fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorContext")
            .field("id", &self.id)
            .field("actor_id", &self.actor_id)
            .finish_non_exhaustive()
    }
}

/// A spawnable child actor.
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Drive the actor to completion or cancellation. Outcomes are
    /// communicated through the context (`done`, `fail`, `emit`), never
    /// returned.
    async fn run(self: Box<Self>, ctx: ActorContext);
}

/// Constructs a fresh [`Behavior`] per invocation from the invoke
/// descriptor and the mapped input. Registered under the source's `kind`
/// in the machine's actor registry.
#[derive(Clone)]
pub struct BehaviorFactory(Arc<dyn Fn(&InvokeDef, &Value) -> Box<dyn Behavior> + Send + Sync>);

impl BehaviorFactory {
    /// Wrap a factory closure.
    pub fn new(
        f: impl Fn(&InvokeDef, &Value) -> Box<dyn Behavior> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Build a behavior for one invocation.
    pub fn build(&self, def: &InvokeDef, input: &Value) -> Box<dyn Behavior> {
        (self.0)(def, input)
    }
}

impl fmt::Debug for BehaviorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<BehaviorFactory>")
    }
}
