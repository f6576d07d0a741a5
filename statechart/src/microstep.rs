//! The microstep engine: conflict removal, exit/entry set computation,
//! history recording, done events, and state assembly.
//!
//! The algorithm follows SCXML: compute the transition domain (LCCA unless
//! the transition is internal within a compound source), exit every active
//! node below each domain in reverse document order, run transition
//! actions, then enter the entry set in document order, drilling through
//! initial targets, parallel regions, and history records.

use crate::machine::Machine;
use crate::node::{NodeId, NodeKind, TransitionDef};
use crate::state::State;
use serde_json::Value;
use statechart_core::event::names;
use statechart_core::{
    Action, Envelope, Event, HistoryKind, HistoryValue, InvokeId, InvokeSource, MachineError,
    PureFn, StateId, StopRef,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One microstep's result.
pub(crate) struct StepOutput {
    /// The assembled next state (internal queue empty; the driver owns it).
    pub state: State,
    /// Events raised during action resolution, in order.
    pub raised: Vec<Envelope>,
    /// Nodes entered this microstep, document order.
    pub entered: Vec<NodeId>,
    /// Nodes exited this microstep, reverse document order.
    pub exited: Vec<NodeId>,
}

/// Substitute history nodes with their recorded (or default) targets.
fn effective_targets(
    machine: &Machine,
    targets: &[NodeId],
    history_value: &HistoryValue,
) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(targets.len());
    for &t in targets {
        let node = machine.node(t);
        if node.is_history() {
            out.extend(history_targets(machine, t, history_value));
        } else {
            out.push(t);
        }
    }
    out
}

/// Recorded nodes if the history was ever captured, else the declared
/// default, else the parent's initial targets.
fn history_targets(
    machine: &Machine,
    history: NodeId,
    history_value: &HistoryValue,
) -> Vec<NodeId> {
    let node = machine.node(history);
    if let Some(recorded) = history_value.get(&node.id) {
        let resolved: Vec<NodeId> = recorded
            .iter()
            .filter_map(|id| machine.node_by_id(id))
            .collect();
        if !resolved.is_empty() {
            return resolved;
        }
    }
    if !node.history_default.is_empty() {
        return node.history_default.clone();
    }
    node.parent
        .map(|p| machine.node(p).initial.clone())
        .unwrap_or_default()
}

/// The transition domain: the source itself for internal transitions fully
/// contained in a compound source, otherwise the LCCA of source + targets.
fn transition_domain(
    machine: &Machine,
    t: &TransitionDef,
    history_value: &HistoryValue,
) -> NodeId {
    let targets = effective_targets(machine, t.targets.as_deref().unwrap_or(&[]), history_value);
    if targets.is_empty() {
        return t.source;
    }
    if t.internal
        && matches!(machine.node(t.source).kind, NodeKind::Compound)
        && targets
            .iter()
            .all(|&s| machine.is_proper_descendant(s, t.source))
    {
        return t.source;
    }
    let mut nodes = vec![t.source];
    nodes.extend(targets);
    lcca(machine, &nodes)
}

/// Least common compound ancestor: the innermost compound/parallel node
/// (or the root) that strictly contains every node in the list.
fn lcca(machine: &Machine, nodes: &[NodeId]) -> NodeId {
    let head = nodes[0];
    for anc in machine.proper_ancestors(head) {
        let kind = machine.node(anc).kind;
        if !(matches!(kind, NodeKind::Compound | NodeKind::Parallel) || anc == machine.root()) {
            continue;
        }
        if nodes[1..]
            .iter()
            .all(|&n| machine.is_proper_descendant(n, anc))
        {
            return anc;
        }
    }
    machine.root()
}

/// Exit set of one transition: active nodes strictly below its domain.
fn exit_set_of(
    machine: &Machine,
    t: &TransitionDef,
    config: &BTreeSet<NodeId>,
    history_value: &HistoryValue,
) -> BTreeSet<NodeId> {
    if t.targets.is_none() {
        return BTreeSet::new();
    }
    let domain = transition_domain(machine, t, history_value);
    config
        .iter()
        .copied()
        .filter(|&s| machine.is_proper_descendant(s, domain))
        .collect()
}

/// SCXML conflict removal: a later transition whose exit set intersects an
/// earlier one's is preempted, unless its source is a descendant of the
/// earlier source — then it preempts the earlier one instead.
pub(crate) fn remove_conflicting(
    machine: &Machine,
    enabled: &[TransitionDef],
    config: &BTreeSet<NodeId>,
    history_value: &HistoryValue,
) -> Vec<TransitionDef> {
    let mut filtered: Vec<(TransitionDef, BTreeSet<NodeId>)> = Vec::new();
    for t1 in enabled {
        let exit1 = exit_set_of(machine, t1, config, history_value);
        let mut preempted = false;
        let mut replaced: Vec<usize> = Vec::new();
        for (i, (t2, exit2)) in filtered.iter().enumerate() {
            if exit1.intersection(exit2).next().is_none() {
                continue;
            }
            if machine.is_proper_descendant(t1.source, t2.source) {
                replaced.push(i);
            } else {
                preempted = true;
                break;
            }
        }
        if !preempted {
            for &i in replaced.iter().rev() {
                filtered.remove(i);
            }
            filtered.push((t1.clone(), exit1));
        }
    }
    filtered.into_iter().map(|(t, _)| t).collect()
}

fn add_descendant_states_to_enter(
    machine: &Machine,
    state: NodeId,
    history_value: &HistoryValue,
    to_enter: &mut BTreeSet<NodeId>,
) {
    let node = machine.node(state);
    if node.is_history() {
        let parent = node.parent.unwrap_or(machine.root());
        let targets = history_targets(machine, state, history_value);
        for &t in &targets {
            add_descendant_states_to_enter(machine, t, history_value, to_enter);
        }
        for &t in &targets {
            add_ancestor_states_to_enter(machine, t, parent, history_value, to_enter);
        }
        return;
    }

    to_enter.insert(state);
    match node.kind {
        NodeKind::Compound => {
            let initial = node.initial.clone();
            for &t in &initial {
                add_descendant_states_to_enter(machine, t, history_value, to_enter);
            }
            for &t in &initial {
                add_ancestor_states_to_enter(machine, t, state, history_value, to_enter);
            }
        }
        NodeKind::Parallel => {
            for &child in &node.children {
                if machine.node(child).is_history() {
                    continue;
                }
                if !to_enter
                    .iter()
                    .any(|&s| machine.is_proper_descendant(s, child))
                {
                    add_descendant_states_to_enter(machine, child, history_value, to_enter);
                }
            }
        }
        _ => {}
    }
}

fn add_ancestor_states_to_enter(
    machine: &Machine,
    state: NodeId,
    ancestor: NodeId,
    history_value: &HistoryValue,
    to_enter: &mut BTreeSet<NodeId>,
) {
    for anc in machine.proper_ancestors_until(state, ancestor) {
        to_enter.insert(anc);
        if matches!(machine.node(anc).kind, NodeKind::Parallel) {
            for &child in &machine.node(anc).children {
                if machine.node(child).is_history() {
                    continue;
                }
                if !to_enter
                    .iter()
                    .any(|&s| machine.is_proper_descendant(s, child))
                {
                    add_descendant_states_to_enter(machine, child, history_value, to_enter);
                }
            }
        }
    }
}

/// Enter `to_enter` in document order: entry actions, invocations, and
/// done-event raises for final nodes. `config` is extended incrementally so
/// the all-regions-final check fires exactly once.
fn enter_states(
    machine: &Machine,
    to_enter: &BTreeSet<NodeId>,
    config: &mut BTreeSet<NodeId>,
    actions: &mut Vec<Action>,
    children: &mut BTreeMap<InvokeId, InvokeSource>,
) -> Vec<NodeId> {
    let entered: Vec<NodeId> = to_enter
        .iter()
        .copied()
        .filter(|s| !config.contains(s))
        .collect();

    for &s in &entered {
        config.insert(s);
        let node = machine.node(s);
        actions.extend(node.entry.iter().cloned());
        for invoke in &node.invoke {
            children.insert(invoke.id.clone(), invoke.src.clone());
            actions.push(Action::Invoke(invoke.clone()));
        }

        if matches!(node.kind, NodeKind::Final) {
            let Some(parent) = node.parent else { continue };
            if parent != machine.root() {
                actions.push(done_state_action(
                    &machine.node(parent).id,
                    node.done_data.clone(),
                ));
                if let Some(grandparent) = machine.node(parent).parent {
                    if matches!(machine.node(grandparent).kind, NodeKind::Parallel)
                        && machine
                            .node(grandparent)
                            .children
                            .iter()
                            .filter(|&&c| !machine.node(c).is_history())
                            .all(|&c| machine.in_final_state(c, config))
                    {
                        actions.push(done_state_action(&machine.node(grandparent).id, None));
                    }
                }
            }
        }
    }
    entered
}

/// A raise of `done.state.<id>`, evaluating the done-data mapper lazily so
/// it observes assigns that ran earlier in the same microstep.
fn done_state_action(
    parent_id: &StateId,
    done_data: Option<statechart_core::ExprFn>,
) -> Action {
    let name = names::done_state(parent_id);
    match done_data {
        None => Action::Raise(Event::new(name)),
        Some(mapper) => Action::Pure(PureFn::new(move |ctx: &Value, ev: &Envelope| {
            vec![Action::Raise(Event::with_data(
                name.clone(),
                mapper.call(ctx, ev),
            ))]
        })),
    }
}

/// Run one batch of enabled transitions against `prev`.
pub(crate) fn microstep(
    machine: &Machine,
    enabled: &[TransitionDef],
    prev: &State,
    envelope: &Envelope,
) -> Result<StepOutput, MachineError> {
    let prev_config: BTreeSet<NodeId> = prev.configuration.iter().copied().collect();
    let filtered = remove_conflicting(machine, enabled, &prev_config, &prev.history_value);

    let mut config = prev_config.clone();
    let mut history_value = prev.history_value.clone();
    let mut children = prev.children.clone();
    let mut actions: Vec<Action> = Vec::new();

    // Exit set across all transitions, reverse document order.
    let mut exit_set: BTreeSet<NodeId> = BTreeSet::new();
    for t in &filtered {
        exit_set.extend(exit_set_of(machine, t, &prev_config, &prev.history_value));
    }
    let exited: Vec<NodeId> = exit_set.iter().rev().copied().collect();

    // Record history from the pre-exit configuration.
    for &s in &exited {
        let node = machine.node(s);
        for &h in &node.children {
            let NodeKind::History(kind) = machine.node(h).kind else {
                continue;
            };
            let recorded: Vec<StateId> = match kind {
                HistoryKind::Shallow => node
                    .children
                    .iter()
                    .copied()
                    .filter(|c| prev_config.contains(c))
                    .map(|c| machine.node(c).id.clone())
                    .collect(),
                HistoryKind::Deep => prev_config
                    .iter()
                    .copied()
                    .filter(|&c| {
                        machine.node(c).is_leaf() && machine.is_proper_descendant(c, s)
                    })
                    .map(|c| machine.node(c).id.clone())
                    .collect(),
            };
            history_value.insert(machine.node(h).id.clone(), recorded);
        }
    }

    // Exits: stop invocations, then exit actions, innermost first.
    for &s in &exited {
        let node = machine.node(s);
        for invoke in &node.invoke {
            children.remove(&invoke.id);
            actions.push(Action::Stop(StopRef::Id(invoke.id.clone())));
        }
        actions.extend(node.exit.iter().cloned());
        config.remove(&s);
    }

    // Transition actions, in selection order.
    for t in &filtered {
        actions.extend(t.actions.iter().cloned());
    }

    // Entry set.
    let mut to_enter: BTreeSet<NodeId> = BTreeSet::new();
    for t in &filtered {
        let Some(targets) = &t.targets else { continue };
        for &target in targets {
            add_descendant_states_to_enter(machine, target, &history_value, &mut to_enter);
        }
        let domain = transition_domain(machine, t, &history_value);
        for &target in &effective_targets(machine, targets, &history_value) {
            add_ancestor_states_to_enter(machine, target, domain, &history_value, &mut to_enter);
        }
    }
    let entered = enter_states(machine, &to_enter, &mut config, &mut actions, &mut children);

    // The user-visible event: eventless microsteps keep the previous one.
    let (event, work_envelope) = if envelope.is_null() {
        (prev.event.clone(), prev.envelope.clone())
    } else {
        (envelope.to_event(), envelope.clone())
    };

    let resolved = crate::resolve::resolve(machine, &actions, &prev.context, &work_envelope, &prev.value);

    let configuration: Vec<NodeId> = config.iter().copied().collect();
    let value = machine.value_of_configuration(&config);
    let done = machine.in_final_state(machine.root(), &config);
    let (tags, meta) = machine.tags_and_meta(&configuration);

    let state = State {
        value,
        context: resolved.context,
        event,
        envelope: work_envelope,
        actions: resolved.actions,
        configuration,
        transitions: filtered,
        history_value,
        history: None,
        children,
        tags,
        meta,
        changed: None,
        done,
        internal_queue: VecDeque::new(),
    };

    Ok(StepOutput {
        state,
        raised: resolved.raised,
        entered,
        exited,
    })
}

/// The initial microstep: enter the root's initial closure with no exits
/// and no previous state.
pub(crate) fn initial_microstep(machine: &Machine) -> Result<StepOutput, MachineError> {
    let envelope = Envelope::init();
    let mut to_enter = BTreeSet::new();
    add_descendant_states_to_enter(
        machine,
        machine.root(),
        &HistoryValue::new(),
        &mut to_enter,
    );

    let mut config: BTreeSet<NodeId> = BTreeSet::new();
    let mut actions: Vec<Action> = Vec::new();
    let mut children: BTreeMap<InvokeId, InvokeSource> = BTreeMap::new();
    let entered = enter_states(machine, &to_enter, &mut config, &mut actions, &mut children);

    let configuration: Vec<NodeId> = config.iter().copied().collect();
    let value = machine.value_of_configuration(&config);
    let resolved = crate::resolve::resolve(machine, &actions, machine.context(), &envelope, &value);
    let done = machine.in_final_state(machine.root(), &config);
    let (tags, meta) = machine.tags_and_meta(&configuration);

    let state = State {
        value,
        context: resolved.context,
        event: envelope.to_event(),
        envelope,
        actions: resolved.actions,
        configuration,
        transitions: Vec::new(),
        history_value: HistoryValue::new(),
        history: None,
        children,
        tags,
        meta,
        changed: None,
        done,
        internal_queue: VecDeque::new(),
    };

    Ok(StepOutput {
        state,
        raised: resolved.raised,
        entered,
        exited: Vec::new(),
    })
}
