//! The compiled node tree and the machine compiler.
//!
//! Compilation runs in two passes. The first pass flattens the config tree
//! into a pre-order arena (`Vec<StateNode>`), assigning ids and document
//! order; the second pass resolves transition targets, initial targets, and
//! history defaults against the complete arena, rewrites `after` entries
//! into send/cancel pairs, and normalizes every handler (`on`, `always`,
//! `after`, `on_done`, invoke handlers) into one uniform transition list.

use crate::config::{ConfigKind, MachineConfig, StateConfig, TransitionConfig};
use serde_json::Value;
use statechart_core::event::names;
use statechart_core::{
    Action, DelaySpec, Event, EventExpr, ExprFn, Guard, HistoryKind, InvokeDef, InvokeId,
    MachineError, SendId, SendSpec, StateId,
};
use std::collections::HashMap;

/// Index of a node in the machine's arena. Document order is the index
/// order: the arena is built by pre-order traversal of the config tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The arena index, which is also the node's document order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Node classification after compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A leaf state.
    Atomic,
    /// A state with children and an initial transition.
    Compound,
    /// Orthogonal regions, all active together.
    Parallel,
    /// A final state.
    Final,
    /// A history pseudo-state; never part of a configuration.
    History(HistoryKind),
}

/// A fully normalized transition.
#[derive(Debug, Clone)]
pub struct TransitionDef {
    /// The node this transition is declared on.
    pub source: NodeId,
    /// Resolved event-type token. Empty = eventless (NULL).
    pub event_type: String,
    /// Guard, if any.
    pub guard: Option<Guard>,
    /// Transition actions.
    pub actions: Vec<Action>,
    /// Resolved targets; `None` for targetless transitions.
    pub targets: Option<Vec<NodeId>>,
    /// Internal transitions do not exit their source.
    pub internal: bool,
    /// Declaration index within the source node, for identity.
    pub(crate) index: usize,
}

/// An immutable state node in the compiled machine.
#[derive(Debug, Clone)]
pub struct StateNode {
    /// Stable id (`machineKey.path.to.node` unless overridden).
    pub id: StateId,
    /// Key relative to the parent.
    pub key: String,
    /// Keys from the root to this node.
    pub path: Vec<String>,
    /// Node kind.
    pub kind: NodeKind,
    /// Parent node; `None` for the root.
    pub parent: Option<NodeId>,
    /// Ordered children.
    pub children: Vec<NodeId>,
    /// Entry actions (user actions plus synthesized `after` sends).
    pub entry: Vec<Action>,
    /// Exit actions (user actions plus synthesized `after` cancels).
    pub exit: Vec<Action>,
    /// Normalized transitions, in declaration order.
    pub transitions: Vec<TransitionDef>,
    /// Initial transition targets (compound nodes).
    pub initial: Vec<NodeId>,
    /// Default target (history nodes).
    pub history_default: Vec<NodeId>,
    /// Invocations started on entry.
    pub invoke: Vec<InvokeDef>,
    /// Final states: maps context + event to the `done.state` payload.
    pub done_data: Option<ExprFn>,
    /// Tags contributed to states that include this node.
    pub tags: Vec<String>,
    /// Metadata surfaced on active states.
    pub meta: Option<Value>,
}

impl StateNode {
    /// True for nodes that can sit at the bottom of a configuration.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Atomic | NodeKind::Final)
    }

    /// True for history pseudo-states.
    pub fn is_history(&self) -> bool {
        matches!(self.kind, NodeKind::History(_))
    }
}

/// Compiler output: the arena plus the machine-wide id map.
#[derive(Debug, Clone)]
pub(crate) struct Compiled {
    pub nodes: Vec<StateNode>,
    pub ids: HashMap<StateId, NodeId>,
}

/// Per-node config pieces deferred to the resolution pass.
struct RawNode {
    on: Vec<(String, Vec<TransitionConfig>)>,
    always: Vec<TransitionConfig>,
    after: Vec<(DelaySpec, Vec<TransitionConfig>)>,
    on_done: Vec<TransitionConfig>,
    invoke: Vec<crate::config::InvokeConfig>,
    initial: Option<String>,
    target: Option<String>,
}

/// Everything the resolution pass computes for one node.
struct NodeAdditions {
    transitions: Vec<TransitionDef>,
    entry: Vec<Action>,
    exit: Vec<Action>,
    initial: Vec<NodeId>,
    history_default: Vec<NodeId>,
    invoke: Vec<InvokeDef>,
}

pub(crate) fn compile(config: &MachineConfig) -> Result<Compiled, MachineError> {
    let mut nodes = Vec::new();
    let mut raws = Vec::new();
    let mut ids = HashMap::new();
    build_node(
        &config.root,
        config.key.clone(),
        Vec::new(),
        None,
        config,
        &mut nodes,
        &mut raws,
        &mut ids,
    )?;

    let mut additions = Vec::with_capacity(nodes.len());
    for index in 0..nodes.len() {
        additions.push(resolve_node(&nodes, &ids, &raws[index], NodeId(index), config)?);
    }
    for (index, add) in additions.into_iter().enumerate() {
        let node = &mut nodes[index];
        node.transitions = add.transitions;
        node.entry.extend(add.entry);
        node.exit.extend(add.exit);
        node.initial = add.initial;
        node.history_default = add.history_default;
        node.invoke = add.invoke;
    }

    Ok(Compiled { nodes, ids })
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    cfg: &StateConfig,
    key: String,
    path: Vec<String>,
    parent: Option<NodeId>,
    config: &MachineConfig,
    nodes: &mut Vec<StateNode>,
    raws: &mut Vec<RawNode>,
    ids: &mut HashMap<StateId, NodeId>,
) -> Result<NodeId, MachineError> {
    let id = match &cfg.id {
        Some(id) => StateId::new(id.clone()),
        None if path.is_empty() => StateId::new(config.key.clone()),
        None => StateId::new(format!(
            "{}{}{}",
            config.key,
            config.delimiter,
            path.join(&config.delimiter.to_string())
        )),
    };
    let node_id = NodeId(nodes.len());
    if ids.insert(id.clone(), node_id).is_some() {
        return Err(MachineError::DuplicateId(id));
    }

    let kind = match cfg.kind {
        ConfigKind::Auto if cfg.states.is_empty() => NodeKind::Atomic,
        ConfigKind::Auto => NodeKind::Compound,
        ConfigKind::Parallel => NodeKind::Parallel,
        ConfigKind::Final => NodeKind::Final,
        ConfigKind::History(kind) => NodeKind::History(kind),
    };

    nodes.push(StateNode {
        id,
        key,
        path: path.clone(),
        kind,
        parent,
        children: Vec::new(),
        entry: cfg.entry.clone(),
        exit: cfg.exit.clone(),
        transitions: Vec::new(),
        initial: Vec::new(),
        history_default: Vec::new(),
        invoke: Vec::new(),
        done_data: cfg.done_data.clone(),
        tags: cfg.tags.clone(),
        meta: cfg.meta.clone(),
    });
    raws.push(RawNode {
        on: cfg.on.clone(),
        always: cfg.always.clone(),
        after: cfg.after.clone(),
        on_done: cfg.on_done.clone(),
        invoke: cfg.invoke.clone(),
        initial: cfg.initial.clone(),
        target: cfg.target.clone(),
    });

    for (child_key, child_cfg) in &cfg.states {
        let mut child_path = path.clone();
        child_path.push(child_key.clone());
        let child_id = build_node(
            child_cfg,
            child_key.clone(),
            child_path,
            Some(node_id),
            config,
            nodes,
            raws,
            ids,
        )?;
        nodes[node_id.0].children.push(child_id);
    }

    Ok(node_id)
}

fn resolve_node(
    nodes: &[StateNode],
    ids: &HashMap<StateId, NodeId>,
    raw: &RawNode,
    source: NodeId,
    config: &MachineConfig,
) -> Result<NodeAdditions, MachineError> {
    let node = &nodes[source.0];
    let mut out = NodeAdditions {
        transitions: Vec::new(),
        entry: Vec::new(),
        exit: Vec::new(),
        initial: Vec::new(),
        history_default: Vec::new(),
        invoke: Vec::new(),
    };

    let push = |event_type: String,
                tc: &TransitionConfig,
                out: &mut NodeAdditions|
     -> Result<(), MachineError> {
        validate_event_descriptor(&event_type, &node.id)?;
        let targets = if tc.targets.is_empty() {
            None
        } else {
            let mut resolved = Vec::with_capacity(tc.targets.len());
            for target in &tc.targets {
                resolved.push(resolve_target(nodes, ids, source, target, config.delimiter)?);
            }
            Some(resolved)
        };
        let internal = tc.internal.unwrap_or_else(|| {
            tc.targets.is_empty()
                || tc
                    .targets
                    .iter()
                    .all(|t| t.starts_with(config.delimiter))
        });
        out.transitions.push(TransitionDef {
            source,
            event_type,
            guard: tc.guard.clone(),
            actions: tc.actions.clone(),
            targets,
            internal,
            index: out.transitions.len(),
        });
        Ok(())
    };

    for (event, tcs) in &raw.on {
        for tc in tcs {
            push(event.clone(), tc, &mut out)?;
        }
    }

    for (delay, tcs) in &raw.after {
        let event_name = names::after(&delay.reference(), &node.id);
        out.entry.push(Action::Send(SendSpec {
            event: EventExpr::Literal(Event::new(event_name.clone())),
            to: None,
            delay: Some(delay.clone()),
            id: Some(SendId::new(event_name.clone())),
        }));
        out.exit.push(Action::Cancel(SendId::new(event_name.clone())));
        for tc in tcs {
            push(event_name.clone(), tc, &mut out)?;
        }
    }

    for tc in &raw.on_done {
        push(names::done_state(&node.id), tc, &mut out)?;
    }

    for (index, ic) in raw.invoke.iter().enumerate() {
        let invoke_id = InvokeId::new(
            ic.id
                .clone()
                .unwrap_or_else(|| format!("{}:invocation[{index}]", node.id)),
        );
        for tc in &ic.on_done {
            push(names::done_invoke(&invoke_id), tc, &mut out)?;
        }
        for tc in &ic.on_error {
            push(names::error_platform(&invoke_id), tc, &mut out)?;
        }
        out.invoke.push(InvokeDef {
            id: invoke_id,
            src: ic.src.clone(),
            input: ic.input.clone(),
            auto_forward: ic.auto_forward,
            sync: ic.sync,
        });
    }

    for tc in &raw.always {
        push(String::new(), tc, &mut out)?;
    }

    if matches!(node.kind, NodeKind::Compound) {
        let initial = raw.initial.as_ref().ok_or(MachineError::MissingInitial {
            state: node.id.clone(),
        })?;
        let target = resolve_initial(nodes, ids, source, initial, config.delimiter)?;
        if !is_proper_descendant(nodes, target, source) {
            return Err(MachineError::InitialNotDescendant {
                state: node.id.clone(),
                target: initial.clone(),
            });
        }
        out.initial = vec![target];
    }

    if node.is_history() {
        if let Some(target) = &raw.target {
            let resolved = resolve_target(nodes, ids, source, target, config.delimiter)?;
            let parent = node.parent.ok_or_else(|| MachineError::UnknownTarget {
                source_state: node.id.clone(),
                target: target.clone(),
            })?;
            if !is_proper_descendant(nodes, resolved, parent) {
                return Err(MachineError::InitialNotDescendant {
                    state: node.id.clone(),
                    target: target.clone(),
                });
            }
            out.history_default = vec![resolved];
        }
    }

    Ok(out)
}

/// `*` is legal only as the final token of a descriptor.
fn validate_event_descriptor(descriptor: &str, state: &StateId) -> Result<(), MachineError> {
    if descriptor.is_empty() || descriptor == "*" {
        return Ok(());
    }
    let tokens: Vec<&str> = descriptor.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        if *token == "*" && i + 1 != tokens.len() {
            return Err(MachineError::InvalidEventDescriptor {
                state: state.clone(),
                descriptor: descriptor.to_owned(),
            });
        }
    }
    Ok(())
}

/// Resolve a target string relative to a transition's source.
///
/// `#id` is a machine-wide id lookup; a leading delimiter descends from the
/// source itself; otherwise the first segment is a sibling key (a child of
/// the source's parent, or of the root for root transitions) and any
/// remaining segments descend through children.
fn resolve_target(
    nodes: &[StateNode],
    ids: &HashMap<StateId, NodeId>,
    source: NodeId,
    target: &str,
    delimiter: char,
) -> Result<NodeId, MachineError> {
    let unknown = || MachineError::UnknownTarget {
        source_state: nodes[source.0].id.clone(),
        target: target.to_owned(),
    };

    if let Some(id) = target.strip_prefix('#') {
        return ids.get(&StateId::new(id)).copied().ok_or_else(unknown);
    }
    if let Some(rest) = target.strip_prefix(delimiter) {
        return descend(nodes, source, rest, delimiter).ok_or_else(unknown);
    }

    let mut segments = target.split(delimiter);
    let first = segments.next().ok_or_else(unknown)?;
    let base = nodes[source.0].parent.unwrap_or(source);
    let mut current = child_by_key(nodes, base, first).ok_or_else(unknown)?;
    for segment in segments {
        current = child_by_key(nodes, current, segment).ok_or_else(unknown)?;
    }
    Ok(current)
}

/// Initial targets resolve from the declaring node downward (or by `#id`).
fn resolve_initial(
    nodes: &[StateNode],
    ids: &HashMap<StateId, NodeId>,
    source: NodeId,
    target: &str,
    delimiter: char,
) -> Result<NodeId, MachineError> {
    let unknown = || MachineError::UnknownTarget {
        source_state: nodes[source.0].id.clone(),
        target: target.to_owned(),
    };
    if let Some(id) = target.strip_prefix('#') {
        return ids.get(&StateId::new(id)).copied().ok_or_else(unknown);
    }
    let path = target.strip_prefix(delimiter).unwrap_or(target);
    descend(nodes, source, path, delimiter).ok_or_else(unknown)
}

fn descend(nodes: &[StateNode], from: NodeId, path: &str, delimiter: char) -> Option<NodeId> {
    let mut current = from;
    for segment in path.split(delimiter) {
        current = child_by_key(nodes, current, segment)?;
    }
    Some(current)
}

pub(crate) fn child_by_key(nodes: &[StateNode], parent: NodeId, key: &str) -> Option<NodeId> {
    nodes[parent.0]
        .children
        .iter()
        .copied()
        .find(|&c| nodes[c.0].key == key)
}

pub(crate) fn is_proper_descendant(nodes: &[StateNode], node: NodeId, ancestor: NodeId) -> bool {
    let mut current = nodes[node.0].parent;
    while let Some(p) = current {
        if p == ancestor {
            return true;
        }
        current = nodes[p.0].parent;
    }
    false
}
