//! The declarative machine definition, before compilation.
//!
//! A [`MachineConfig`] is a plain tree of [`StateConfig`] values built with
//! chainable methods. Nothing is validated here — the compiler in
//! [`crate::node`] turns the tree into an indexed machine and reports
//! construction errors.

use serde_json::Value;
use statechart_core::{
    Action, DelaySpec, ExprFn, Guard, HistoryKind, InvokeSource,
};

/// One transition as written in the config: string targets, an optional
/// guard, actions, and an optional explicit internal marker.
#[derive(Debug, Clone, Default)]
pub struct TransitionConfig {
    /// Target strings (`"sibling"`, `"#id"`, `".child"`, `"sibling.sub"`).
    /// Empty means a targetless (actions-only) transition.
    pub targets: Vec<String>,
    /// Transition guard.
    pub guard: Option<Guard>,
    /// Transition actions.
    pub actions: Vec<Action>,
    /// Explicit internal marker; when `None` the compiler infers it from
    /// the target strings.
    pub internal: Option<bool>,
}

impl TransitionConfig {
    /// A transition to a single target.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            targets: vec![target.into()],
            ..Self::default()
        }
    }

    /// A transition to multiple targets (parallel regions).
    pub fn to_many<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A targetless transition: runs actions without exiting anything.
    pub fn actions_only(actions: Vec<Action>) -> Self {
        Self {
            actions,
            ..Self::default()
        }
    }

    /// Guard the transition.
    pub fn guarded(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Append one action.
    pub fn action(mut self, action: impl Into<Action>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Append several actions.
    pub fn actions(mut self, actions: Vec<Action>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Force the internal/external classification.
    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = Some(internal);
        self
    }
}

impl From<&str> for TransitionConfig {
    fn from(target: &str) -> Self {
        TransitionConfig::to(target)
    }
}

impl From<String> for TransitionConfig {
    fn from(target: String) -> Self {
        TransitionConfig::to(target)
    }
}

/// An invocation as written in the config.
#[derive(Debug, Clone)]
pub struct InvokeConfig {
    /// Explicit invocation id; defaults to `<nodeId>:invocation[<index>]`.
    pub id: Option<String>,
    /// What to invoke.
    pub src: InvokeSource,
    /// Maps context + event to the child's input.
    pub input: Option<ExprFn>,
    /// Transitions taken on `done.invoke.<id>`.
    pub on_done: Vec<TransitionConfig>,
    /// Transitions taken on `error.platform.<id>`.
    pub on_error: Vec<TransitionConfig>,
    /// Forward every external parent event to the child.
    pub auto_forward: bool,
    /// Nested machines: re-emit child state changes as `statechart.update`.
    pub sync: bool,
}

impl InvokeConfig {
    /// Invoke a source.
    pub fn new(src: InvokeSource) -> Self {
        Self {
            id: None,
            src,
            input: None,
            on_done: Vec::new(),
            on_error: Vec::new(),
            auto_forward: false,
            sync: false,
        }
    }

    /// Invoke a registry kind with no parameters.
    pub fn kind(kind: impl Into<String>) -> Self {
        Self::new(InvokeSource::new(kind))
    }

    /// Set the invocation id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the input mapper.
    pub fn input(
        mut self,
        f: impl Fn(&Value, &statechart_core::Envelope) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.input = Some(ExprFn::new(f));
        self
    }

    /// Add an `on_done` transition.
    pub fn on_done(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    /// Add an `on_error` transition.
    pub fn on_error(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_error.push(transition.into());
        self
    }

    /// Auto-forward parent events to this child.
    pub fn auto_forward(mut self) -> Self {
        self.auto_forward = true;
        self
    }

    /// Re-emit child state changes to the parent.
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }
}

/// How a state's kind is declared. `Auto` becomes atomic or compound
/// depending on whether the state has children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigKind {
    /// Atomic without children, compound with.
    #[default]
    Auto,
    /// Orthogonal regions; all children are active together.
    Parallel,
    /// A final state.
    Final,
    /// A history pseudo-state.
    History(HistoryKind),
}

/// One state in the declarative tree.
#[derive(Debug, Clone, Default)]
pub struct StateConfig {
    /// Explicit id override.
    pub id: Option<String>,
    /// Declared kind.
    pub kind: ConfigKind,
    /// Initial child key/path (compound states).
    pub initial: Option<String>,
    /// Ordered children.
    pub states: Vec<(String, StateConfig)>,
    /// Event → transitions, in declaration order.
    pub on: Vec<(String, Vec<TransitionConfig>)>,
    /// Eventless transitions.
    pub always: Vec<TransitionConfig>,
    /// Delayed transitions.
    pub after: Vec<(DelaySpec, Vec<TransitionConfig>)>,
    /// Entry actions.
    pub entry: Vec<Action>,
    /// Exit actions.
    pub exit: Vec<Action>,
    /// Transitions on `done.state.<id>` of this state.
    pub on_done: Vec<TransitionConfig>,
    /// Invocations started on entry.
    pub invoke: Vec<InvokeConfig>,
    /// History default target (history states only).
    pub target: Option<String>,
    /// Tags surfaced on states whose configuration includes this node.
    pub tags: Vec<String>,
    /// Free-form metadata surfaced on active states.
    pub meta: Option<Value>,
    /// Final states: maps context + event to `done.state` payload.
    pub done_data: Option<ExprFn>,
}

impl StateConfig {
    /// An empty (atomic) state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the node id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Declare the initial child.
    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.initial = Some(key.into());
        self
    }

    /// Add a child state.
    pub fn child(mut self, key: impl Into<String>, config: StateConfig) -> Self {
        self.states.push((key.into(), config));
        self
    }

    /// Add one transition for an event.
    pub fn on(mut self, event: impl Into<String>, transition: impl Into<TransitionConfig>) -> Self {
        let event = event.into();
        let transition = transition.into();
        if let Some((_, list)) = self.on.iter_mut().find(|(e, _)| *e == event) {
            list.push(transition);
        } else {
            self.on.push((event, vec![transition]));
        }
        self
    }

    /// Add an eventless transition.
    pub fn always(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.always.push(transition.into());
        self
    }

    /// Add a delayed transition.
    pub fn after(mut self, delay: impl Into<DelaySpec>, transition: impl Into<TransitionConfig>) -> Self {
        let delay = delay.into();
        let transition = transition.into();
        if let Some((_, list)) = self.after.iter_mut().find(|(d, _)| *d == delay) {
            list.push(transition);
        } else {
            self.after.push((delay, vec![transition]));
        }
        self
    }

    /// Append an entry action.
    pub fn entry(mut self, action: impl Into<Action>) -> Self {
        self.entry.push(action.into());
        self
    }

    /// Append an exit action.
    pub fn exit(mut self, action: impl Into<Action>) -> Self {
        self.exit.push(action.into());
        self
    }

    /// Add a transition on this state's done event.
    pub fn on_done(mut self, transition: impl Into<TransitionConfig>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    /// Add an invocation.
    pub fn invoke(mut self, invoke: InvokeConfig) -> Self {
        self.invoke.push(invoke);
        self
    }

    /// Mark as parallel.
    pub fn parallel(mut self) -> Self {
        self.kind = ConfigKind::Parallel;
        self
    }

    /// Mark as final.
    pub fn final_state(mut self) -> Self {
        self.kind = ConfigKind::Final;
        self
    }

    /// Mark as a history pseudo-state.
    pub fn history(mut self, kind: HistoryKind) -> Self {
        self.kind = ConfigKind::History(kind);
        self
    }

    /// Set the history default target.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Attach metadata.
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the done-data mapper (final states).
    pub fn done_data(
        mut self,
        f: impl Fn(&Value, &statechart_core::Envelope) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.done_data = Some(ExprFn::new(f));
        self
    }
}

/// The whole machine definition.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Machine key; the root node id unless overridden, and the prefix of
    /// every generated node id.
    pub key: String,
    /// Initial context.
    pub context: Value,
    /// Strict mode: unhandled events and error events become hard errors.
    pub strict: bool,
    /// Path delimiter for generated ids and target strings.
    pub delimiter: char,
    /// The root state.
    pub root: StateConfig,
}

impl MachineConfig {
    /// A machine with the given key and an empty root.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            context: Value::Null,
            strict: false,
            delimiter: '.',
            root: StateConfig::new(),
        }
    }

    /// Set the initial context.
    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Enable strict mode.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Override the path delimiter.
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the root state.
    pub fn state(mut self, root: StateConfig) -> Self {
        self.root = root;
        self
    }
}
