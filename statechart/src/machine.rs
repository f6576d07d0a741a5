//! The compiled machine and its registries.

use crate::config::MachineConfig;
use crate::macrostep;
use crate::node::{self, NodeId, NodeKind, StateNode};
use crate::state::State;
use crate::transition::event_descriptor_matches;
use serde_json::{json, Value};
use statechart_core::{
    Action, BehaviorFactory, DelayFn, Envelope, Event, GuardFn, MachineError, StateId, StateValue,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Name → implementation registries, provided alongside the config.
///
/// Registries are what keep machine definitions serializable: the config
/// references actions, guards, delays, and actors by name; implementations
/// are resolved here at resolution/spawn time.
#[derive(Debug, Clone, Default)]
pub struct MachineOptions {
    /// Named actions, substituted for `Action::Custom` references.
    pub actions: HashMap<String, Action>,
    /// Named guard implementations.
    pub guards: HashMap<String, GuardFn>,
    /// Named delay expressions.
    pub delays: HashMap<String, DelayFn>,
    /// Behavior factories for invoke sources, by kind.
    pub actors: HashMap<String, BehaviorFactory>,
}

impl MachineOptions {
    /// Empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named action.
    pub fn action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Register a named guard.
    pub fn guard(mut self, name: impl Into<String>, guard: GuardFn) -> Self {
        self.guards.insert(name.into(), guard);
        self
    }

    /// Register a named delay expression.
    pub fn delay(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Envelope) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.delays.insert(name.into(), DelayFn::new(f));
        self
    }

    /// Register a behavior factory for an invoke-source kind.
    pub fn actor(mut self, kind: impl Into<String>, factory: BehaviorFactory) -> Self {
        self.actors.insert(kind.into(), factory);
        self
    }

    /// Overlay `other` on top of these registries.
    pub fn merge(&mut self, other: MachineOptions) {
        self.actions.extend(other.actions);
        self.guards.extend(other.guards);
        self.delays.extend(other.delays);
        self.actors.extend(other.actors);
    }
}

/// A compiled, immutable statechart. The pure transition function lives
/// here; driving it over time is the interpreter's job.
#[derive(Debug, Clone)]
pub struct Machine {
    key: String,
    strict: bool,
    context: Value,
    nodes: Vec<StateNode>,
    ids: HashMap<StateId, NodeId>,
    options: MachineOptions,
}

impl Machine {
    /// Compile a config with empty registries.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        Self::with_options(config, MachineOptions::new())
    }

    /// Compile a config with registries.
    pub fn with_options(
        config: MachineConfig,
        options: MachineOptions,
    ) -> Result<Self, MachineError> {
        let compiled = node::compile(&config)?;
        Ok(Self {
            key: config.key,
            strict: config.strict,
            context: config.context,
            nodes: compiled.nodes,
            ids: compiled.ids,
            options,
        })
    }

    /// A copy of this machine with additional registry entries. The
    /// original is untouched.
    pub fn provide(&self, options: MachineOptions) -> Self {
        let mut copy = self.clone();
        copy.options.merge(options);
        copy
    }

    /// A copy of this machine with a different initial context.
    pub fn with_context(&self, context: Value) -> Self {
        let mut copy = self.clone();
        copy.context = context;
        copy
    }

    /// The machine key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Strict mode flag.
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// The initial context.
    pub fn context(&self) -> &Value {
        &self.context
    }

    /// The registries.
    pub fn options(&self) -> &MachineOptions {
        &self.options
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Look up a node by arena id.
    pub fn node(&self, id: NodeId) -> &StateNode {
        &self.nodes[id.0]
    }

    /// Look up a node by its stable state id.
    pub fn node_by_id(&self, id: &StateId) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    /// The initial state: the root's initial closure, with its entry
    /// actions and any immediately-following eventless/raised microsteps.
    pub fn initial_state(&self) -> Result<State, MachineError> {
        macrostep::macrostep(self, None, Envelope::init())
    }

    /// The pure transition function.
    pub fn transition(
        &self,
        state: &State,
        event: impl Into<Event>,
    ) -> Result<State, MachineError> {
        self.transition_envelope(state, Envelope::external(event.into()))
    }

    /// Transition with a pre-built envelope (interpreter path: origin and
    /// invoke id already stamped).
    pub fn transition_envelope(
        &self,
        state: &State,
        envelope: Envelope,
    ) -> Result<State, MachineError> {
        macrostep::macrostep(self, Some(state), envelope)
    }

    /// Transition from a bare state value with the machine's initial
    /// context.
    pub fn transition_value(
        &self,
        value: StateValue,
        event: impl Into<Event>,
    ) -> Result<State, MachineError> {
        let state = self.state_from_value(value)?;
        self.transition(&state, event)
    }

    /// Build a resolved state from a (possibly partial) state value.
    pub fn state_from_value(&self, value: StateValue) -> Result<State, MachineError> {
        let mut state = State::create(json!({ "value": value }))?;
        state.context = self.context.clone();
        self.resolve_state(state)
    }

    /// Resolve a rehydrated state: expand its (possibly partial) value into
    /// a full configuration and recompute the derived fields.
    pub fn resolve_state(&self, mut state: State) -> Result<State, MachineError> {
        let mut config = BTreeSet::new();
        self.config_from_value(self.root(), &state.value, &mut config)?;
        state.configuration = config.iter().copied().collect();
        state.value = self.value_of_configuration(&config);
        state.done = self.in_final_state(self.root(), &config);
        let (tags, meta) = self.tags_and_meta(&state.configuration);
        state.tags = tags;
        state.meta = meta;
        state.actions.clear();
        state.transitions.clear();
        state.changed = None;
        Ok(state)
    }

    /// The done payload of a finished machine: the done-data mapping of
    /// the top-level final node in the configuration, if any. Used by
    /// interpreters to fill `done.invoke.<id>` events.
    pub fn done_data(&self, state: &State) -> Value {
        for &id in &state.configuration {
            let node = self.node(id);
            if matches!(node.kind, NodeKind::Final) && node.parent == Some(self.root()) {
                if let Some(mapper) = &node.done_data {
                    return mapper.call(&state.context, &state.envelope);
                }
            }
        }
        Value::Null
    }

    // ─── tree helpers ───────────────────────────────────────────────

    pub(crate) fn self_and_ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![node];
        out.extend(self.proper_ancestors(node));
        out
    }

    pub(crate) fn proper_ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes[node.0].parent;
        while let Some(p) = current {
            out.push(p);
            current = self.nodes[p.0].parent;
        }
        out
    }

    /// Proper ancestors of `node`, innermost first, stopping before
    /// `until` (which is excluded). Yields all ancestors when `until` is
    /// not an ancestor.
    pub(crate) fn proper_ancestors_until(&self, node: NodeId, until: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes[node.0].parent;
        while let Some(p) = current {
            if p == until {
                break;
            }
            out.push(p);
            current = self.nodes[p.0].parent;
        }
        out
    }

    pub(crate) fn is_proper_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        node::is_proper_descendant(&self.nodes, node, ancestor)
    }

    /// Derive the state value from a configuration.
    pub(crate) fn value_of_configuration(&self, config: &BTreeSet<NodeId>) -> StateValue {
        self.node_value(self.root(), config)
    }

    fn node_value(&self, node: NodeId, config: &BTreeSet<NodeId>) -> StateValue {
        let n = self.node(node);
        match n.kind {
            NodeKind::Parallel => StateValue::Compound(
                n.children
                    .iter()
                    .filter(|&&c| !self.node(c).is_history())
                    .map(|&c| (self.node(c).key.clone(), self.node_value(c, config)))
                    .collect(),
            ),
            NodeKind::Compound => {
                let active = n
                    .children
                    .iter()
                    .copied()
                    .find(|c| config.contains(c) && !self.node(*c).is_history());
                match active {
                    Some(child) if self.node(child).children.is_empty() => {
                        StateValue::Leaf(self.node(child).key.clone())
                    }
                    Some(child) => StateValue::Compound(BTreeMap::from([(
                        self.node(child).key.clone(),
                        self.node_value(child, config),
                    )])),
                    None => StateValue::Compound(BTreeMap::new()),
                }
            }
            _ => StateValue::Compound(BTreeMap::new()),
        }
    }

    /// SCXML final-configuration test.
    pub(crate) fn in_final_state(&self, node: NodeId, config: &BTreeSet<NodeId>) -> bool {
        let n = self.node(node);
        match n.kind {
            NodeKind::Compound => n
                .children
                .iter()
                .any(|&c| matches!(self.node(c).kind, NodeKind::Final) && config.contains(&c)),
            NodeKind::Parallel => n
                .children
                .iter()
                .filter(|&&c| !self.node(c).is_history())
                .all(|&c| self.in_final_state(c, config)),
            _ => false,
        }
    }

    pub(crate) fn tags_and_meta(
        &self,
        configuration: &[NodeId],
    ) -> (BTreeSet<String>, BTreeMap<StateId, Value>) {
        let mut tags = BTreeSet::new();
        let mut meta = BTreeMap::new();
        for &id in configuration {
            let node = self.node(id);
            tags.extend(node.tags.iter().cloned());
            if let Some(m) = &node.meta {
                meta.insert(node.id.clone(), m.clone());
            }
        }
        (tags, meta)
    }

    /// Does any transition descriptor anywhere in the machine match this
    /// event name? Used by the strict-mode unknown-event check.
    pub(crate) fn handles_event(&self, name: &str) -> bool {
        self.nodes.iter().any(|node| {
            node.transitions
                .iter()
                .any(|t| !t.event_type.is_empty() && event_descriptor_matches(&t.event_type, name))
        })
    }

    /// Expand a (possibly partial) state value into a configuration.
    fn config_from_value(
        &self,
        node: NodeId,
        value: &StateValue,
        config: &mut BTreeSet<NodeId>,
    ) -> Result<(), MachineError> {
        config.insert(node);
        let n = self.node(node);
        match n.kind {
            NodeKind::Compound => match value {
                StateValue::Leaf(key) => {
                    let child = node::child_by_key(&self.nodes, node, key)
                        .ok_or_else(|| MachineError::UnknownState(key.clone()))?;
                    self.enter_default(child, config);
                }
                StateValue::Compound(map) => {
                    let (key, sub) = map
                        .iter()
                        .next()
                        .ok_or_else(|| MachineError::UnknownState("empty state value".into()))?;
                    let child = node::child_by_key(&self.nodes, node, key)
                        .ok_or_else(|| MachineError::UnknownState(key.clone()))?;
                    self.config_from_value(child, sub, config)?;
                }
            },
            NodeKind::Parallel => {
                for &region in n
                    .children
                    .iter()
                    .filter(|&&c| !self.node(c).is_history())
                {
                    let sub = match value {
                        StateValue::Compound(map) => map.get(&self.node(region).key),
                        StateValue::Leaf(_) => None,
                    };
                    match sub {
                        Some(sub) => self.config_from_value(region, sub, config)?,
                        None => self.enter_default(region, config),
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Default-enter a node: itself plus its initial closure.
    fn enter_default(&self, node: NodeId, config: &mut BTreeSet<NodeId>) {
        config.insert(node);
        let n = self.node(node);
        match n.kind {
            NodeKind::Compound => {
                for &target in &n.initial {
                    for anc in self.proper_ancestors_until(target, node) {
                        config.insert(anc);
                    }
                    self.enter_default(target, config);
                }
            }
            NodeKind::Parallel => {
                for &child in n.children.iter().filter(|&&c| !self.node(c).is_history()) {
                    self.enter_default(child, config);
                }
            }
            _ => {}
        }
    }
}
