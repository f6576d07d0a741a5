//! Behavior adapters: uniform [`Behavior`] implementations for the things
//! a machine can invoke — nested machines, one-shot futures, callback
//! loops, event streams, and reducers.
//!
//! Each adapter is exposed as a [`BehaviorFactory`] constructor, to be
//! registered in `MachineOptions::actor` under the invoke source's kind.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{Future, FutureExt, Stream, StreamExt};
use serde_json::{json, Value};
use statechart::Machine;
use statechart_core::event::names;
use statechart_core::{
    ActorContext, ActorId, Behavior, BehaviorFactory, Envelope, Event, EventKind, InvokeId,
};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{Interpreter, Status};

fn parent_envelope(
    actor_id: &ActorId,
    invoke_id: &InvokeId,
    name: String,
    kind: EventKind,
    data: Value,
) -> Envelope {
    Envelope {
        name,
        kind,
        send_id: None,
        origin: Some(actor_id.clone()),
        invoke_id: Some(invoke_id.clone()),
        data,
    }
}

// ─── nested machine ─────────────────────────────────────────────────

struct MachineBehavior {
    machine: Machine,
    sync: bool,
}

#[async_trait]
impl Behavior for MachineBehavior {
    async fn run(self: Box<Self>, ctx: ActorContext) {
        let MachineBehavior { machine, sync } = *self;
        let ActorContext {
            id,
            actor_id,
            input,
            to_parent,
            mut from_parent,
            cancel,
            snapshot,
        } = ctx;

        let machine = if input.is_null() {
            machine
        } else {
            machine.with_context(input)
        };
        let mut interp = Interpreter::new(machine)
            .with_actor_id(actor_id.clone())
            .with_parent_link(to_parent.clone(), id.clone());

        if interp.start().is_err() {
            let message = interp.last_error().unwrap_or("start failed").to_owned();
            let _ = to_parent.send(parent_envelope(
                &actor_id,
                &id,
                names::error_platform(&id),
                EventKind::Error,
                Value::String(message),
            ));
            return;
        }

        loop {
            let outcome = interp.state().map(|state| {
                (
                    state.to_json(),
                    state.done,
                    interp.machine().done_data(state),
                )
            });
            if let Some((state_json, done, done_data)) = outcome {
                let _ = snapshot.send(state_json.clone());
                if sync {
                    let _ = to_parent.send(parent_envelope(
                        &actor_id,
                        &id,
                        names::UPDATE.to_owned(),
                        EventKind::External,
                        json!({ "state": state_json }),
                    ));
                }
                if done {
                    let _ = to_parent.send(parent_envelope(
                        &actor_id,
                        &id,
                        names::done_invoke(&id),
                        EventKind::External,
                        done_data,
                    ));
                    interp.stop();
                    return;
                }
            }
            if interp.status() == Status::Stopped {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    interp.stop();
                    return;
                }
                maybe = from_parent.recv() => match maybe {
                    Some(envelope) => {
                        let _ = interp.send_envelope(envelope);
                    }
                    None => {
                        interp.stop();
                        return;
                    }
                },
                Some(envelope) = interp.recv_mailbox() => {
                    interp.route_mailbox(envelope);
                }
            }
        }
    }
}

/// A nested-machine actor. Invoke input (when non-null) becomes the child
/// machine's initial context; the child's final state emits
/// `done.invoke.<id>` with its done-data; `sync: true` re-emits every
/// child state as `statechart.update`.
pub fn machine_actor(machine: Machine) -> BehaviorFactory {
    BehaviorFactory::new(move |def, _input| {
        Box::new(MachineBehavior {
            machine: machine.clone(),
            sync: def.sync,
        })
    })
}

// ─── future (promise) ───────────────────────────────────────────────

struct FutureBehavior {
    future: BoxFuture<'static, Result<Value, Value>>,
}

#[async_trait]
impl Behavior for FutureBehavior {
    async fn run(self: Box<Self>, ctx: ActorContext) {
        let FutureBehavior { future } = *self;
        tokio::select! {
            _ = ctx.cancel.cancelled() => {}
            result = future => match result {
                Ok(value) => ctx.done(value),
                Err(error) => ctx.fail(error),
            },
        }
    }
}

/// A one-shot asynchronous actor: resolve emits `done.invoke.<id>`, reject
/// emits `error.platform.<id>`. The closure receives the mapped invoke
/// input.
pub fn promise<F, Fut>(f: F) -> BehaviorFactory
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Value>> + Send + 'static,
{
    let f = Arc::new(f);
    BehaviorFactory::new(move |_def, input| {
        let f = Arc::clone(&f);
        let input = input.clone();
        Box::new(FutureBehavior {
            future: async move { f(input).await }.boxed(),
        })
    })
}

// ─── callback ───────────────────────────────────────────────────────

/// Send-back handle passed to [`callback`] actors. Events emitted here
/// arrive at the parent interpreter stamped with this actor's origin.
#[derive(Clone)]
pub struct CallbackEmitter {
    actor_id: ActorId,
    invoke_id: InvokeId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl CallbackEmitter {
    /// Send an event to the parent.
    pub fn send(&self, event: impl Into<Event>) {
        let event = event.into();
        let _ = self.tx.send(parent_envelope(
            &self.actor_id,
            &self.invoke_id,
            event.name,
            EventKind::External,
            event.data,
        ));
    }
}

type CallbackFn = dyn Fn(CallbackEmitter, mpsc::UnboundedReceiver<Envelope>) -> BoxFuture<'static, ()>
    + Send
    + Sync;

struct CallbackBehavior {
    f: Arc<CallbackFn>,
}

#[async_trait]
impl Behavior for CallbackBehavior {
    async fn run(self: Box<Self>, ctx: ActorContext) {
        let ActorContext {
            id,
            actor_id,
            to_parent,
            from_parent,
            cancel,
            ..
        } = ctx;
        let emitter = CallbackEmitter {
            actor_id,
            invoke_id: id,
            tx: to_parent,
        };
        let future = (self.f)(emitter, from_parent);
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = future => {}
        }
    }
}

/// A callback actor: the closure gets a send-back handle and the stream of
/// parent events (sends targeted at this child plus auto-forwards), and
/// runs until it returns or the invocation is stopped.
pub fn callback<F>(f: F) -> BehaviorFactory
where
    F: Fn(CallbackEmitter, mpsc::UnboundedReceiver<Envelope>) -> BoxFuture<'static, ()>
        + Send
        + Sync
        + 'static,
{
    let f: Arc<CallbackFn> = Arc::new(f);
    BehaviorFactory::new(move |_def, _input| {
        Box::new(CallbackBehavior { f: Arc::clone(&f) })
    })
}

// ─── stream (observable) ────────────────────────────────────────────

struct StreamBehavior {
    stream: BoxStream<'static, Result<Event, Value>>,
}

#[async_trait]
impl Behavior for StreamBehavior {
    async fn run(self: Box<Self>, ctx: ActorContext) {
        let StreamBehavior { mut stream } = *self;
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                item = stream.next() => match item {
                    Some(Ok(event)) => ctx.emit(event),
                    Some(Err(error)) => {
                        ctx.fail(error);
                        return;
                    }
                    None => {
                        ctx.done(Value::Null);
                        return;
                    }
                },
            }
        }
    }
}

/// An observable actor: each `Ok` item is an event to the parent, an `Err`
/// item emits `error.platform.<id>`, and completion emits
/// `done.invoke.<id>`.
pub fn stream<F, S>(f: F) -> BehaviorFactory
where
    F: Fn(Value) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Event, Value>> + Send + 'static,
{
    let f = Arc::new(f);
    BehaviorFactory::new(move |_def, input| {
        Box::new(StreamBehavior {
            stream: f(input.clone()).boxed(),
        })
    })
}

// ─── reducer ────────────────────────────────────────────────────────

type ReducerFn = dyn Fn(Value, &Envelope) -> Value + Send + Sync;

struct ReducerBehavior {
    state: Value,
    f: Arc<ReducerFn>,
}

#[async_trait]
impl Behavior for ReducerBehavior {
    async fn run(self: Box<Self>, ctx: ActorContext) {
        let ReducerBehavior { mut state, f } = *self;
        let ActorContext {
            mut from_parent,
            cancel,
            snapshot,
            ..
        } = ctx;
        let _ = snapshot.send(state.clone());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                maybe = from_parent.recv() => match maybe {
                    Some(envelope) => {
                        state = f(state, &envelope);
                        let _ = snapshot.send(state.clone());
                    }
                    None => return,
                },
            }
        }
    }
}

/// A minimal stateful actor: `{ initial_state, transition }`. Snapshots
/// are readable through the child handle's `snapshot()`.
pub fn reducer<F>(initial: Value, f: F) -> BehaviorFactory
where
    F: Fn(Value, &Envelope) -> Value + Send + Sync + 'static,
{
    let f: Arc<ReducerFn> = Arc::new(f);
    BehaviorFactory::new(move |_def, _input| {
        Box::new(ReducerBehavior {
            state: initial.clone(),
            f: Arc::clone(&f),
        })
    })
}
