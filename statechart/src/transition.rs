//! The transition algebra: event matching, guard evaluation, and
//! candidate selection.

use crate::machine::Machine;
use crate::node::TransitionDef;
use crate::state::State;
use serde_json::Value;
use statechart_core::{Envelope, Guard, GuardContext, GuardError, MachineError, StateValue};
use std::collections::HashSet;

/// Match an event name against a transition's event-type descriptor.
///
/// Exact match; `""` matches only the NULL event; `*` matches any non-NULL
/// event; a trailing `.*` matches any event whose leading tokens equal the
/// descriptor's.
pub fn event_descriptor_matches(descriptor: &str, event: &str) -> bool {
    if descriptor == event {
        return true;
    }
    if event.is_empty() || descriptor.is_empty() {
        return false;
    }
    if descriptor == "*" {
        return true;
    }
    if let Some(prefix) = descriptor.strip_suffix(".*") {
        let head: Vec<&str> = prefix.split('.').collect();
        let tokens: Vec<&str> = event.split('.').collect();
        return tokens.len() >= head.len() && head.iter().zip(&tokens).all(|(a, b)| a == b);
    }
    false
}

/// Select the enabled transitions for an event.
///
/// Each active leaf tries its own transitions first, then each proper
/// ancestor's, scanning candidates in declaration order; the first
/// guard-passing candidate wins for that leaf. A transition selected
/// through several leaves (parallel regions sharing an ancestor) appears
/// once, at its first selection position.
pub(crate) fn select_transitions(
    machine: &Machine,
    state: &State,
    envelope: &Envelope,
) -> Result<Vec<TransitionDef>, MachineError> {
    let mut selected: Vec<TransitionDef> = Vec::new();
    let mut seen: HashSet<(crate::node::NodeId, usize)> = HashSet::new();

    for &leaf in state
        .configuration
        .iter()
        .filter(|&&n| machine.node(n).is_leaf())
    {
        'walk: for node_id in machine.self_and_ancestors(leaf) {
            let node = machine.node(node_id);
            for t in &node.transitions {
                if !event_descriptor_matches(&t.event_type, &envelope.name) {
                    continue;
                }
                let pass = match &t.guard {
                    None => true,
                    Some(guard) => {
                        evaluate_guard(machine, guard, &state.context, envelope, &state.value)
                            .map_err(|err| rewrap(err, guard.kind(), envelope, node))?
                    }
                };
                if pass {
                    if seen.insert((t.source, t.index)) {
                        selected.push(t.clone());
                    }
                    break 'walk;
                }
            }
        }
    }

    Ok(selected)
}

/// Evaluate a guard descriptor. `state_value` is the stable pre-microstep
/// state value — guards never observe a partially updated configuration.
pub(crate) fn evaluate_guard(
    machine: &Machine,
    guard: &Guard,
    context: &Value,
    envelope: &Envelope,
    state_value: &StateValue,
) -> Result<bool, GuardError> {
    match guard {
        Guard::In(partial) => Ok(state_value.matches(partial)),
        Guard::And(guards) => {
            for g in guards {
                if !evaluate_guard(machine, g, context, envelope, state_value)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Guard::Or(guards) => {
            for g in guards {
                if evaluate_guard(machine, g, context, envelope, state_value)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Guard::Not(inner) => Ok(!evaluate_guard(machine, inner, context, envelope, state_value)?),
        Guard::Named { name, params } => {
            let implementation = machine
                .options()
                .guards
                .get(name)
                .ok_or_else(|| GuardError::Failed(format!("guard '{name}' is not registered")))?;
            implementation.call(&GuardContext {
                context,
                event: envelope,
                state_value,
                params,
            })
        }
        Guard::Inline(f) => f.call(&GuardContext {
            context,
            event: envelope,
            state_value,
            params: &Value::Null,
        }),
    }
}

/// Attach the guard name, event, and source id to an evaluation failure.
fn rewrap(
    err: GuardError,
    guard: &str,
    envelope: &Envelope,
    node: &crate::node::StateNode,
) -> MachineError {
    match err {
        already @ GuardError::Evaluation { .. } => MachineError::Guard(already),
        other => MachineError::Guard(GuardError::Evaluation {
            guard: guard.to_owned(),
            event: envelope.name.clone(),
            source_state: node.id.clone(),
            message: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_matching() {
        assert!(event_descriptor_matches("FETCH", "FETCH"));
        assert!(!event_descriptor_matches("FETCH", "OTHER"));
        assert!(event_descriptor_matches("*", "anything"));
        assert!(event_descriptor_matches("*", "done.invoke.x"));
    }

    #[test]
    fn null_event_only_matches_empty_descriptor() {
        assert!(event_descriptor_matches("", ""));
        assert!(!event_descriptor_matches("*", ""));
        assert!(!event_descriptor_matches("a", ""));
        assert!(!event_descriptor_matches("", "a"));
    }

    #[test]
    fn token_prefix_matching() {
        assert!(event_descriptor_matches("done.invoke.*", "done.invoke.loader"));
        assert!(event_descriptor_matches("a.b.*", "a.b"));
        assert!(event_descriptor_matches("a.b.*", "a.b.c.d"));
        assert!(!event_descriptor_matches("a.b.*", "a.bc"));
        assert!(!event_descriptor_matches("a.b.*", "a"));
    }
}
