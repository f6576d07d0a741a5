//! # statechart-interpreter — the actor layer
//!
//! Drives a compiled [`Machine`] over time: an external event queue drained
//! one macrostep at a time, synchronous subscribers, delayed sends on tokio
//! timers, and child actors spawned from invoke actions through the
//! machine's actor registry.
//!
//! `send` is synchronous — a macrostep runs to completion before the call
//! returns, and subscribers observe every post-macrostep state in order.
//! Asynchronous inputs (timers, child events) land on an internal mailbox;
//! the async pumps ([`Interpreter::run_until_idle`],
//! [`Interpreter::wait_until`], [`Interpreter::wait_done`]) feed them
//! through the same external path between macrosteps.
//!
//! Child actors implement the [`Behavior`] protocol from `statechart-core`;
//! the [`behaviors`] module provides adapters for nested machines, futures,
//! callbacks, streams, and reducers.

#![deny(missing_docs)]

pub mod behaviors;

use serde_json::Value;
use statechart::{Machine, State};
use statechart_core::event::names;
use statechart_core::{
    Action, ActorError, ActorId, DelaySpec, Envelope, Event, EventExpr, InvokeDef, InvokeId,
    SendId, SendTarget, StopRef, ValueExpr,
};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interpreter lifecycle. Start is idempotent once running; stop is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created but not started; external events are deferred or dropped.
    NotStarted,
    /// Accepting and processing events.
    Running,
    /// Stopped; all further sends are ignored.
    Stopped,
}

/// Interpreter construction options.
#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// Queue events sent before `start` and replay them on start, instead
    /// of dropping them.
    pub defer_events: bool,
    /// Actor id; defaults to the machine key.
    pub id: Option<String>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            defer_events: true,
            id: None,
        }
    }
}

/// Handle returned by the subscription methods; pass to
/// [`Interpreter::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// A running child actor, owned by the interpreter that invoked it.
pub struct ChildHandle {
    /// The invocation id.
    pub id: InvokeId,
    /// The child's actor reference.
    pub actor_id: ActorId,
    tx: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
    snapshot: watch::Receiver<Value>,
    auto_forward: bool,
}

impl ChildHandle {
    /// The child's latest observable snapshot (reducer state, nested
    /// machine state JSON).
    pub fn snapshot(&self) -> Value {
        self.snapshot.borrow().clone()
    }

    fn send(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }
}

/// Where this interpreter reports when it runs as a child actor.
pub(crate) struct ParentLink {
    invoke_id: InvokeId,
    tx: mpsc::UnboundedSender<Envelope>,
}

type StateCallback = Box<dyn FnMut(&State) + Send>;
type ErrorCallback = Box<dyn FnMut(&ActorError) + Send>;
type StopCallback = Box<dyn FnMut() + Send>;

/// The long-running interpreter (service) around a machine.
pub struct Interpreter {
    machine: Machine,
    id: ActorId,
    status: Status,
    state: Option<State>,
    last_error: Option<String>,
    external: VecDeque<Envelope>,
    deferred: Vec<Envelope>,
    draining: bool,
    observers: Vec<(u64, StateCallback)>,
    done_observers: Vec<(u64, StateCallback)>,
    error_observers: Vec<(u64, ErrorCallback)>,
    stop_observers: Vec<(u64, StopCallback)>,
    next_token: u64,
    mailbox_tx: mpsc::UnboundedSender<Envelope>,
    mailbox_rx: mpsc::UnboundedReceiver<Envelope>,
    delayed: HashMap<SendId, JoinHandle<()>>,
    children: HashMap<InvokeId, ChildHandle>,
    options: InterpreterOptions,
    parent: Option<ParentLink>,
}

/// Create an interpreter for a machine with default options.
pub fn interpret(machine: Machine) -> Interpreter {
    Interpreter::new(machine)
}

impl Interpreter {
    /// Create an interpreter with default options.
    pub fn new(machine: Machine) -> Self {
        Self::with_options(machine, InterpreterOptions::default())
    }

    /// Create an interpreter with options.
    pub fn with_options(machine: Machine, options: InterpreterOptions) -> Self {
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let id = ActorId::new(
            options
                .id
                .clone()
                .unwrap_or_else(|| machine.key().to_owned()),
        );
        Self {
            machine,
            id,
            status: Status::NotStarted,
            state: None,
            last_error: None,
            external: VecDeque::new(),
            deferred: Vec::new(),
            draining: false,
            observers: Vec::new(),
            done_observers: Vec::new(),
            error_observers: Vec::new(),
            stop_observers: Vec::new(),
            next_token: 0,
            mailbox_tx,
            mailbox_rx,
            delayed: HashMap::new(),
            children: HashMap::new(),
            options,
            parent: None,
        }
    }

    pub(crate) fn with_actor_id(mut self, id: ActorId) -> Self {
        self.id = id;
        self
    }

    pub(crate) fn with_parent_link(
        mut self,
        tx: mpsc::UnboundedSender<Envelope>,
        invoke_id: InvokeId,
    ) -> Self {
        self.parent = Some(ParentLink { invoke_id, tx });
        self
    }

    /// This interpreter's actor reference.
    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// The machine being interpreted.
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Lifecycle status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The latest state, if started.
    pub fn state(&self) -> Option<&State> {
        self.state.as_ref()
    }

    /// The message of the error that stopped this interpreter, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A child handle by invocation id.
    pub fn child(&self, id: &InvokeId) -> Option<&ChildHandle> {
        self.children.get(id)
    }

    // ─── lifecycle ──────────────────────────────────────────────────

    /// Start the interpreter: compute the initial state, perform its
    /// actions (including starting invocations), notify subscribers, and
    /// replay any deferred events. Idempotent while running.
    pub fn start(&mut self) -> Result<&State, ActorError> {
        match self.status {
            Status::Running => {}
            Status::Stopped => return Err(ActorError::Stopped),
            Status::NotStarted => {
                self.status = Status::Running;
                debug!(actor = %self.id, "starting interpreter");
                match self.machine.initial_state() {
                    Ok(initial) => self.commit(initial),
                    Err(err) => {
                        let err = ActorError::Machine(err);
                        self.fail(err);
                        return Err(ActorError::Stopped);
                    }
                }
                self.flush_deferred();
                self.drain();
            }
        }
        self.state.as_ref().ok_or(ActorError::Stopped)
    }

    /// Start from a rehydrated state: resume its configuration without
    /// re-running entry actions, re-arm delayed transitions, and restart
    /// invocations of the active states.
    pub fn start_with(&mut self, state: State) -> Result<&State, ActorError> {
        match self.status {
            Status::Running => return self.state.as_ref().ok_or(ActorError::Stopped),
            Status::Stopped => return Err(ActorError::Stopped),
            Status::NotStarted => {}
        }
        let resolved = self
            .machine
            .resolve_state(state)
            .map_err(ActorError::Machine)?;
        self.status = Status::Running;
        debug!(actor = %self.id, value = %resolved.value, "resuming interpreter");

        let context = resolved.context.clone();
        let envelope = resolved.envelope.clone();
        let configuration = resolved.configuration.clone();
        let done = resolved.done;
        self.state = Some(resolved);

        for &node_id in &configuration {
            let node = self.machine.node(node_id).clone();
            for action in &node.entry {
                let Action::Send(spec) = action else { continue };
                let ms = match &spec.delay {
                    None => continue,
                    Some(DelaySpec::Ms(ms)) => Some(*ms),
                    Some(DelaySpec::Named(name)) => self
                        .machine
                        .options()
                        .delays
                        .get(name)
                        .map(|f| f.call(&context, &envelope)),
                };
                let Some(ms) = ms else {
                    warn!(actor = %self.id, "cannot re-arm delayed send: unknown delay");
                    continue;
                };
                let mut rearmed = spec.clone();
                rearmed.delay = Some(DelaySpec::Ms(ms));
                self.execute(&Action::Send(rearmed), &context, &envelope);
            }
            for invoke in &node.invoke {
                self.start_child(invoke.clone(), &context, &envelope);
            }
        }

        self.notify_transition();
        if done {
            self.finish();
        } else {
            self.flush_deferred();
            self.drain();
        }
        self.state.as_ref().ok_or(ActorError::Stopped)
    }

    /// Stop the interpreter: cancel children (each subtree innermost
    /// first), abort timers, and notify stop subscribers. Terminal.
    pub fn stop(&mut self) {
        if self.status == Status::Stopped {
            return;
        }
        debug!(actor = %self.id, "stopping interpreter");
        self.stop_internal();
        self.status = Status::Stopped;
        self.notify_stop();
    }

    // ─── events ─────────────────────────────────────────────────────

    /// Send an event. While running this drains the queue synchronously:
    /// subscribers have observed the resulting state when the call
    /// returns. Before start the event is deferred (or dropped when
    /// `defer_events` is off); after stop it is ignored.
    pub fn send(&mut self, event: impl Into<Event>) -> Result<(), ActorError> {
        self.send_envelope(Envelope::external(event.into()))
    }

    /// Send a pre-built envelope (origin and invoke id already stamped).
    pub fn send_envelope(&mut self, envelope: Envelope) -> Result<(), ActorError> {
        match self.status {
            Status::Stopped => {
                warn!(actor = %self.id, event = %envelope.name, "event sent to stopped interpreter");
                Ok(())
            }
            Status::NotStarted => {
                if self.options.defer_events {
                    self.deferred.push(envelope);
                } else {
                    warn!(actor = %self.id, event = %envelope.name, "dropping event sent before start");
                }
                Ok(())
            }
            Status::Running => {
                self.external.push_back(envelope);
                self.drain();
                Ok(())
            }
        }
    }

    /// Send a batch of events. Transition semantics are unchanged — each
    /// event runs its own macrostep and its own notification — but the
    /// whole batch is enqueued up front and drained in one window.
    pub fn batch<I, E>(&mut self, events: I) -> Result<(), ActorError>
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        match self.status {
            Status::Stopped => Ok(()),
            Status::NotStarted => {
                for event in events {
                    self.send(event)?;
                }
                Ok(())
            }
            Status::Running => {
                for event in events {
                    self.external.push_back(Envelope::external(event.into()));
                }
                self.drain();
                Ok(())
            }
        }
    }

    // ─── subscriptions ──────────────────────────────────────────────

    /// Observe every post-macrostep state, synchronously, in subscription
    /// order.
    pub fn subscribe(&mut self, cb: impl FnMut(&State) + Send + 'static) -> Subscription {
        let token = self.token();
        self.observers.push((token, Box::new(cb)));
        Subscription(token)
    }

    /// Alias of [`Interpreter::subscribe`].
    pub fn on_transition(&mut self, cb: impl FnMut(&State) + Send + 'static) -> Subscription {
        self.subscribe(cb)
    }

    /// Observe the final state when the machine reaches a top-level final
    /// configuration.
    pub fn on_done(&mut self, cb: impl FnMut(&State) + Send + 'static) -> Subscription {
        let token = self.token();
        self.done_observers.push((token, Box::new(cb)));
        Subscription(token)
    }

    /// Observe interpreter errors (strict-mode unhandled events, guard
    /// failures, unhandled child errors).
    pub fn on_error(&mut self, cb: impl FnMut(&ActorError) + Send + 'static) -> Subscription {
        let token = self.token();
        self.error_observers.push((token, Box::new(cb)));
        Subscription(token)
    }

    /// Observe the stop transition.
    pub fn on_stop(&mut self, cb: impl FnMut() + Send + 'static) -> Subscription {
        let token = self.token();
        self.stop_observers.push((token, Box::new(cb)));
        Subscription(token)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&mut self, sub: Subscription) {
        self.observers.retain(|(t, _)| *t != sub.0);
        self.done_observers.retain(|(t, _)| *t != sub.0);
        self.error_observers.retain(|(t, _)| *t != sub.0);
        self.stop_observers.retain(|(t, _)| *t != sub.0);
    }

    // ─── async pumps ────────────────────────────────────────────────

    /// Process mailbox events (timer fires, child events) until none are
    /// pending. Yields to let spawned tasks make progress; with a paused
    /// tokio clock, sleeping timers fire as the runtime idles.
    pub async fn run_until_idle(&mut self) {
        loop {
            tokio::task::yield_now().await;
            match self.mailbox_rx.try_recv() {
                Ok(envelope) => self.route_mailbox(envelope),
                Err(_) => {
                    for _ in 0..8 {
                        tokio::task::yield_now().await;
                    }
                    match self.mailbox_rx.try_recv() {
                        Ok(envelope) => self.route_mailbox(envelope),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    /// Pump the mailbox until the state satisfies the predicate. Returns
    /// the matching state.
    pub async fn wait_until(
        &mut self,
        pred: impl Fn(&State) -> bool,
    ) -> Result<State, ActorError> {
        loop {
            if let Some(state) = &self.state {
                if pred(state) {
                    return Ok(state.clone());
                }
            }
            if self.status == Status::Stopped {
                return Err(ActorError::Stopped);
            }
            match self.mailbox_rx.recv().await {
                Some(envelope) => self.route_mailbox(envelope),
                None => return Err(ActorError::Stopped),
            }
        }
    }

    /// Pump the mailbox until the machine is done; returns the final
    /// state.
    pub async fn wait_done(&mut self) -> Result<State, ActorError> {
        self.wait_until(|state| state.done).await
    }

    pub(crate) async fn recv_mailbox(&mut self) -> Option<Envelope> {
        self.mailbox_rx.recv().await
    }

    /// Feed a mailbox envelope through the external event path.
    pub(crate) fn route_mailbox(&mut self, envelope: Envelope) {
        if let Some(send_id) = &envelope.send_id {
            self.delayed.remove(send_id);
        }
        if let Some(invoke_id) = envelope.invoke_id.clone() {
            let finished = envelope.name == names::done_invoke(&invoke_id)
                || envelope.name == names::error_platform(&invoke_id);
            if finished {
                if let Some(child) = self.children.remove(&invoke_id) {
                    child.cancel.cancel();
                }
            }
        }
        if self.status == Status::Running {
            self.external.push_back(envelope);
            self.drain();
        }
    }

    // ─── internals ──────────────────────────────────────────────────

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn flush_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let deferred = std::mem::take(&mut self.deferred);
        self.external.extend(deferred);
        self.drain();
    }

    fn drain(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        while self.status == Status::Running {
            let Some(envelope) = self.external.pop_front() else {
                break;
            };
            self.process(envelope);
        }
        self.draining = false;
    }

    fn process(&mut self, envelope: Envelope) {
        // Auto-forwarded children observe the event before the parent
        // transitions on it. The originating child is skipped.
        let forwards: Vec<mpsc::UnboundedSender<Envelope>> = self
            .children
            .values()
            .filter(|c| c.auto_forward && envelope.invoke_id.as_ref() != Some(&c.id))
            .map(|c| c.tx.clone())
            .collect();
        for tx in forwards {
            let _ = tx.send(envelope.clone());
        }

        let Some(current) = self.state.as_ref() else {
            return;
        };
        match self.machine.transition_envelope(current, envelope) {
            Ok(next) => self.commit(next),
            Err(err) => self.fail(ActorError::Machine(err)),
        }
    }

    fn commit(&mut self, state: State) {
        let actions = state.actions.clone();
        let context = state.context.clone();
        let envelope = state.envelope.clone();
        let done = state.done;
        self.state = Some(state);
        for action in &actions {
            self.execute(action, &context, &envelope);
        }
        self.notify_transition();
        if done {
            self.finish();
        }
    }

    fn execute(&mut self, action: &Action, context: &Value, envelope: &Envelope) {
        match action {
            Action::Send(spec) => self.execute_send(spec, envelope),
            Action::Cancel(id) => {
                if let Some(handle) = self.delayed.remove(id) {
                    handle.abort();
                }
            }
            Action::Log { label, message } => {
                let message = match message {
                    ValueExpr::Literal(v) => v.clone(),
                    ValueExpr::Expr(f) => f.call(context, envelope),
                };
                match label {
                    Some(label) => info!(actor = %self.id, %label, "{message}"),
                    None => info!(actor = %self.id, "{message}"),
                }
            }
            Action::Invoke(def) => self.start_child(def.clone(), context, envelope),
            Action::Stop(StopRef::Id(id)) => self.stop_child(id),
            Action::Stop(StopRef::Expr(f)) => {
                let id = match f.call(context, envelope) {
                    Value::String(id) => InvokeId::new(id),
                    other => InvokeId::new(other.to_string()),
                };
                self.stop_child(&id);
            }
            Action::Escalate(data) => {
                let data = match data {
                    ValueExpr::Literal(v) => v.clone(),
                    ValueExpr::Expr(f) => f.call(context, envelope),
                };
                match &self.parent {
                    Some(parent) => {
                        let mut env =
                            Envelope::error(names::error_platform(&parent.invoke_id), data);
                        env.origin = Some(self.id.clone());
                        env.invoke_id = Some(parent.invoke_id.clone());
                        let _ = parent.tx.send(env);
                    }
                    None => warn!(actor = %self.id, "escalate with no parent"),
                }
            }
            Action::Custom { exec: Some(f), .. } => f.call(context, envelope),
            // Resolved during the macrostep; nothing left to perform.
            Action::Assign(_)
            | Action::Raise(_)
            | Action::Pure(_)
            | Action::Choose(_)
            | Action::Custom { exec: None, .. } => {}
        }
    }

    fn execute_send(&mut self, spec: &statechart_core::SendSpec, _envelope: &Envelope) {
        let EventExpr::Literal(event) = &spec.event else {
            return;
        };
        let send_id = spec
            .id
            .clone()
            .unwrap_or_else(|| SendId::new(event.name.clone()));
        let mut out = Envelope::external(event.clone());
        out.origin = Some(self.id.clone());
        out.send_id = Some(send_id.clone());

        let target_tx = match &spec.to {
            None | Some(SendTarget::SelfActor) => None,
            Some(SendTarget::Parent) => match &self.parent {
                Some(parent) => {
                    out.invoke_id = Some(parent.invoke_id.clone());
                    Some(parent.tx.clone())
                }
                None => {
                    warn!(actor = %self.id, event = %event.name, "send to parent with no parent");
                    return;
                }
            },
            Some(SendTarget::Child(name)) => {
                let id = InvokeId::new(name.clone());
                match self.children.get(&id) {
                    Some(child) => Some(child.tx.clone()),
                    None => {
                        warn!(actor = %self.id, child = %name, "send to unknown child");
                        return;
                    }
                }
            }
            // Rerouted as a raise by the resolver.
            Some(SendTarget::Internal) => return,
        };

        match &spec.delay {
            Some(DelaySpec::Ms(ms)) => {
                let ms = *ms;
                let tx = target_tx.unwrap_or_else(|| self.mailbox_tx.clone());
                debug!(actor = %self.id, event = %event.name, ms, "scheduling delayed send");
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                    let _ = tx.send(out);
                });
                if let Some(stale) = self.delayed.insert(send_id, handle) {
                    stale.abort();
                }
            }
            // Named delays are concretized by the resolver.
            Some(DelaySpec::Named(_)) | None => match target_tx {
                Some(tx) => {
                    let _ = tx.send(out);
                }
                None => self.external.push_back(out),
            },
        }
    }

    fn start_child(&mut self, def: InvokeDef, context: &Value, envelope: &Envelope) {
        // Re-entry across macrosteps is stop + restart.
        if let Some(existing) = self.children.remove(&def.id) {
            existing.cancel.cancel();
        }
        let Some(factory) = self.machine.options().actors.get(&def.src.kind) else {
            warn!(actor = %self.id, kind = %def.src.kind, "no behavior registered for invoke source");
            return;
        };
        let input = def
            .input
            .as_ref()
            .map(|f| f.call(context, envelope))
            .unwrap_or(Value::Null);
        let behavior = factory.build(&def, &input);

        let (to_child, from_parent) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Value::Null);
        let cancel = CancellationToken::new();
        let actor_id = ActorId::new(format!("{}:{}", self.id, def.id));
        debug!(actor = %self.id, child = %def.id, kind = %def.src.kind, "starting child actor");

        let ctx = statechart_core::ActorContext {
            id: def.id.clone(),
            actor_id: actor_id.clone(),
            input,
            to_parent: self.mailbox_tx.clone(),
            from_parent,
            cancel: cancel.clone(),
            snapshot: snapshot_tx,
        };
        tokio::spawn(behavior.run(ctx));

        self.children.insert(
            def.id.clone(),
            ChildHandle {
                id: def.id,
                actor_id,
                tx: to_child,
                cancel,
                snapshot: snapshot_rx,
                auto_forward: def.auto_forward,
            },
        );
    }

    fn stop_child(&mut self, id: &InvokeId) {
        if let Some(child) = self.children.remove(id) {
            debug!(actor = %self.id, child = %id, "stopping child actor");
            child.cancel.cancel();
        }
    }

    fn stop_internal(&mut self) {
        for (_, child) in self.children.drain() {
            child.cancel.cancel();
        }
        for (_, handle) in self.delayed.drain() {
            handle.abort();
        }
    }

    fn notify_transition(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let mut observers = std::mem::take(&mut self.observers);
        for (_, cb) in observers.iter_mut() {
            cb(&state);
        }
        self.observers = observers;
        self.state = Some(state);
    }

    fn finish(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let mut observers = std::mem::take(&mut self.done_observers);
        for (_, cb) in observers.iter_mut() {
            cb(&state);
        }
        self.done_observers = observers;
        self.state = Some(state);

        self.stop_internal();
        self.status = Status::Stopped;
        self.notify_stop();
    }

    fn fail(&mut self, err: ActorError) {
        tracing::error!(actor = %self.id, error = %err, "interpreter error");
        self.last_error = Some(err.to_string());
        let mut observers = std::mem::take(&mut self.error_observers);
        for (_, cb) in observers.iter_mut() {
            cb(&err);
        }
        self.error_observers = observers;

        self.stop_internal();
        self.status = Status::Stopped;
        self.notify_stop();
    }

    fn notify_stop(&mut self) {
        let mut observers = std::mem::take(&mut self.stop_observers);
        for (_, cb) in observers.iter_mut() {
            cb();
        }
        self.stop_observers = observers;
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.stop_internal();
    }
}
