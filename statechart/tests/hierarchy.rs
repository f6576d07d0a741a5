//! Transition semantics over hierarchical machines: selection order,
//! internal vs. external transitions, action ordering, and the internal
//! event queue.

use serde_json::Value;
use statechart::{
    actions, Action, Machine, MachineConfig, MachineError, State, StateConfig, TransitionConfig,
};
use statechart_core::ValueExpr;

/// Pull the resolved log messages out of a state's action list, in order.
fn logs(state: &State) -> Vec<String> {
    state
        .actions
        .iter()
        .filter_map(|action| match action {
            Action::Log {
                message: ValueExpr::Literal(Value::String(s)),
                ..
            } => Some(s.clone()),
            _ => None,
        })
        .collect()
}

fn mark(message: &str) -> Action {
    actions::log_msg(message)
}

fn light() -> Machine {
    Machine::new(
        MachineConfig::new("light").state(
            StateConfig::new()
                .initial("green")
                .child("green", StateConfig::new().on("TIMER", "yellow"))
                .child("yellow", StateConfig::new().on("TIMER", "red"))
                .child(
                    "red",
                    StateConfig::new()
                        .initial("walk")
                        .child("walk", StateConfig::new().on("COUNTDOWN", "wait"))
                        .child("wait", StateConfig::new().on("COUNTDOWN", "stop"))
                        .child("stop", StateConfig::new())
                        .on("TIMER", "green"),
                ),
        ),
    )
    .unwrap()
}

/// Configuration invariant: the active set is the ancestor closure of the
/// active leaves.
fn assert_closed(machine: &Machine, state: &State) {
    use std::collections::BTreeSet;
    let config: BTreeSet<_> = state.configuration.iter().copied().collect();
    let mut closure = BTreeSet::new();
    for &id in &state.configuration {
        let node = machine.node(id);
        if node.is_leaf() {
            closure.insert(id);
            let mut parent = node.parent;
            while let Some(p) = parent {
                closure.insert(p);
                parent = machine.node(p).parent;
            }
        }
    }
    assert_eq!(config, closure, "configuration is not ancestor-closed");
}

#[test]
fn walks_through_flat_transitions() {
    let machine = light();
    let state = machine.initial_state().unwrap();
    assert!(state.matches("green"));

    let state = machine.transition(&state, "TIMER").unwrap();
    assert!(state.matches("yellow"));
    assert_eq!(state.changed, Some(true));
    assert_closed(&machine, &state);
}

#[test]
fn compound_targets_enter_the_initial_child() {
    let machine = light();
    let state = machine.transition_value("yellow".into(), "TIMER").unwrap();
    assert!(state.matches("red.walk"));
    assert_closed(&machine, &state);
}

#[test]
fn child_transitions_take_priority_over_ancestors() {
    let machine = light();
    let state = machine.transition_value("yellow".into(), "TIMER").unwrap();

    // COUNTDOWN is only handled by the leaf.
    let state = machine.transition(&state, "COUNTDOWN").unwrap();
    assert!(state.matches("red.wait"));

    // TIMER on the parent still works from any leaf.
    let state = machine.transition(&state, "TIMER").unwrap();
    assert!(state.matches("green"));
}

#[test]
fn unhandled_events_leave_the_state_unchanged() {
    let machine = light();
    let state = machine.initial_state().unwrap();
    let next = machine.transition(&state, "NOPE").unwrap();
    assert_eq!(next.changed, Some(false));
    assert_eq!(next.value, state.value);
    assert!(next.actions.is_empty());
}

#[test]
fn strict_machines_reject_unknown_events() {
    let machine = Machine::new(
        MachineConfig::new("m").strict().state(
            StateConfig::new()
                .initial("a")
                .child("a", StateConfig::new().on("GO", "b"))
                .child("b", StateConfig::new()),
        ),
    )
    .unwrap();
    let state = machine.initial_state().unwrap();
    assert!(matches!(
        machine.transition(&state, "MYSTERY"),
        Err(MachineError::UnhandledEvent(_))
    ));
    // Declared events still work.
    assert!(machine.transition(&state, "GO").unwrap().matches("b"));
}

#[test]
fn exit_transition_entry_action_order() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("a")
                .child(
                    "a",
                    StateConfig::new()
                        .initial("a1")
                        .child("a1", StateConfig::new().exit(mark("exit a1")))
                        .exit(mark("exit a"))
                        .on(
                            "GO",
                            TransitionConfig::to("b").action(mark("transition")),
                        ),
                )
                .child(
                    "b",
                    StateConfig::new()
                        .entry(mark("enter b"))
                        .initial("b1")
                        .child("b1", StateConfig::new().entry(mark("enter b1"))),
                ),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "GO").unwrap();
    assert_eq!(
        logs(&state),
        vec!["exit a1", "exit a", "transition", "enter b", "enter b1"]
    );
}

#[test]
fn targetless_transitions_run_actions_without_exiting() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new().initial("a").child(
                "a",
                StateConfig::new()
                    .entry(mark("enter a"))
                    .exit(mark("exit a"))
                    .on("TICK", TransitionConfig::actions_only(vec![mark("tick")])),
            ),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "TICK").unwrap();
    assert_eq!(logs(&state), vec!["tick"]);
    assert!(state.matches("a"));
}

#[test]
fn external_self_transitions_reenter_the_state() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new().initial("a").child(
                "a",
                StateConfig::new()
                    .entry(mark("enter a"))
                    .exit(mark("exit a"))
                    .on("RESET", "a"),
            ),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "RESET").unwrap();
    assert_eq!(logs(&state), vec!["exit a", "enter a"]);
}

#[test]
fn eventless_transitions_run_before_raised_events() {
    // `b` raises BAR on entry and leaves for `c` on its eventless
    // transition; `c` handles BAR. The eventless step must resolve first,
    // so BAR is handled in `c` and the machine lands in `e`.
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("a")
                .child("a", StateConfig::new().on("FOO", "b"))
                .child(
                    "b",
                    StateConfig::new()
                        .entry(actions::raise("BAR"))
                        .always("c"),
                )
                .child("c", StateConfig::new().on("BAR", "e"))
                .child("e", StateConfig::new()),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "FOO").unwrap();
    assert!(state.matches("e"));
    assert_eq!(state.internal_queue_len(), 0);
}

#[test]
fn wildcard_and_prefix_descriptors() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("a")
                .child(
                    "a",
                    StateConfig::new()
                        .on("done.invoke.*", "caught")
                        .on("*", "other"),
                )
                .child("caught", StateConfig::new())
                .child("other", StateConfig::new()),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "done.invoke.loader").unwrap();
    assert!(state.matches("caught"));

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "ANYTHING").unwrap();
    assert!(state.matches("other"));
}

#[test]
fn done_state_events_drive_on_done() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("work")
                .child(
                    "work",
                    StateConfig::new()
                        .initial("s1")
                        .child("s1", StateConfig::new().on("FINISH", "fin"))
                        .child(
                            "fin",
                            StateConfig::new()
                                .final_state()
                                .done_data(|_ctx, _ev| serde_json::json!({"ok": true})),
                        )
                        .on_done("celebrate"),
                )
                .child("celebrate", StateConfig::new()),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "FINISH").unwrap();
    assert!(state.matches("celebrate"));
}

#[test]
fn top_level_final_states_mark_the_machine_done() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("a")
                .child("a", StateConfig::new().on("END", "fin"))
                .child("fin", StateConfig::new().final_state()),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    assert!(!state.done);
    let state = machine.transition(&state, "END").unwrap();
    assert!(state.done);
}

#[test]
fn after_rewrite_produces_a_regular_transition() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("doing")
                .child("doing", StateConfig::new().after(100u64, "idle"))
                .child("idle", StateConfig::new()),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    // Entry carries the delayed send descriptor for the interpreter.
    assert!(state.actions.iter().any(|a| matches!(
        a,
        Action::Send(spec) if spec.delay.is_some()
    )));

    // The synthesized event drives the transition like any other.
    let state = machine
        .transition(&state, "statechart.after(100)#m.doing")
        .unwrap();
    assert!(state.matches("idle"));
}
