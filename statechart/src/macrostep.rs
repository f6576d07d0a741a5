//! The macrostep driver: one external event, then microsteps until the
//! internal queue drains and no eventless transition remains enabled.

use crate::machine::Machine;
use crate::microstep::{initial_microstep, microstep, StepOutput};
use crate::node::NodeId;
use crate::state::State;
use crate::transition::select_transitions;
use statechart_core::{Action, Envelope, EventKind, InvokeId, MachineError, StopRef};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// True for runtime-generated event names, which are exempt from the
/// strict-mode unknown-event check.
fn is_builtin(name: &str) -> bool {
    name.starts_with("statechart.") || name.starts_with("done.") || name.starts_with("error.")
}

/// Any eventless transition enabled on the current state?
fn has_eventless(machine: &Machine, state: &State) -> Result<bool, MachineError> {
    Ok(!select_transitions(machine, state, &Envelope::null())?.is_empty())
}

/// Invocations collected during the macrostep, dropped again if their node
/// exits before the macrostep completes.
struct InvokeLedger {
    pending: HashMap<InvokeId, NodeId>,
    dropped: HashSet<InvokeId>,
}

impl InvokeLedger {
    fn new() -> Self {
        Self {
            pending: HashMap::new(),
            dropped: HashSet::new(),
        }
    }

    fn record(&mut self, machine: &Machine, out: &StepOutput) {
        for &node in &out.exited {
            let exited_here: Vec<InvokeId> = self
                .pending
                .iter()
                .filter(|&(_, &n)| n == node)
                .map(|(id, _)| id.clone())
                .collect();
            for id in exited_here {
                self.pending.remove(&id);
                self.dropped.insert(id);
            }
        }
        for &node in &out.entered {
            for invoke in &machine.node(node).invoke {
                self.pending.insert(invoke.id.clone(), node);
            }
        }
    }

    /// Strip invoke/stop actions for children that were never started.
    fn filter(&self, actions: &mut Vec<Action>) {
        if self.dropped.is_empty() {
            return;
        }
        actions.retain(|action| match action {
            Action::Invoke(def) => !self.dropped.contains(&def.id),
            Action::Stop(StopRef::Id(id)) => !self.dropped.contains(id),
            _ => true,
        });
    }
}

pub(crate) fn macrostep(
    machine: &Machine,
    prev: Option<&State>,
    envelope: Envelope,
) -> Result<State, MachineError> {
    let mut ledger = InvokeLedger::new();

    let first = match prev {
        None => initial_microstep(machine)?,
        Some(prev_state) => {
            let selected = select_transitions(machine, prev_state, &envelope)?;
            if selected.is_empty() {
                if machine.strict() {
                    if envelope.kind == EventKind::Error {
                        return Err(MachineError::UnhandledError {
                            event: envelope.name,
                            data: envelope.data.to_string(),
                        });
                    }
                    if !is_builtin(&envelope.name) && !machine.handles_event(&envelope.name) {
                        return Err(MachineError::UnhandledEvent(envelope.name));
                    }
                }
                trace!(event = %envelope.name, "event selected no transitions");
                let mut state = prev_state.clone();
                state.event = envelope.to_event();
                state.envelope = envelope;
                state.actions = Vec::new();
                state.transitions = Vec::new();
                state.changed = Some(false);
                state.internal_queue.clear();
                return Ok(state);
            }
            microstep(machine, &selected, prev_state, &envelope)?
        }
    };
    ledger.record(machine, &first);

    let mut queue: VecDeque<Envelope> = first.raised.into();
    let mut state = first.state;
    let mut all_actions = std::mem::take(&mut state.actions);
    let mut all_transitions = std::mem::take(&mut state.transitions);

    loop {
        if state.done {
            break;
        }
        if has_eventless(machine, &state)? {
            queue.push_front(Envelope::null());
        }
        let Some(next) = queue.pop_front() else { break };

        let selected = select_transitions(machine, &state, &next)?;
        if selected.is_empty() {
            if machine.strict() && next.kind == EventKind::Error {
                return Err(MachineError::UnhandledError {
                    event: next.name,
                    data: next.data.to_string(),
                });
            }
            trace!(event = %next.name, "internal event selected no transitions");
            continue;
        }

        let out = microstep(machine, &selected, &state, &next)?;
        ledger.record(machine, &out);
        all_actions.extend(out.state.actions.iter().cloned());
        all_transitions.extend(out.state.transitions.iter().cloned());
        queue.extend(out.raised);
        state = out.state;
    }

    ledger.filter(&mut all_actions);
    state.actions = all_actions;
    state.transitions = all_transitions;
    state.internal_queue = queue;

    if let Some(prev_state) = prev {
        let mut kept = prev_state.clone();
        kept.history = None;
        state.changed = Some(
            !state.transitions.is_empty()
                && (!state.actions.is_empty()
                    || state.value != kept.value
                    || state.context != kept.context),
        );
        state.history = Some(Box::new(kept));
    }

    debug!(
        machine = machine.key(),
        value = %state.value,
        done = state.done,
        "macrostep complete"
    );
    Ok(state)
}
