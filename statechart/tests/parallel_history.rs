//! Parallel regions, conflict resolution, eventless closure across
//! regions, and history restoration.

use statechart::{guards, Machine, MachineConfig, StateConfig, StateValue, TransitionConfig};
use statechart_core::HistoryKind;

fn region(initial: &str, states: Vec<(&str, StateConfig)>) -> StateConfig {
    let mut cfg = StateConfig::new().initial(initial);
    for (key, state) in states {
        cfg = cfg.child(key, state);
    }
    cfg
}

#[test]
fn parallel_states_activate_every_region() {
    let machine = Machine::new(
        MachineConfig::new("word").state(
            StateConfig::new()
                .parallel()
                .child(
                    "bold",
                    region(
                        "off",
                        vec![
                            ("on", StateConfig::new().on("TOGGLE_BOLD", "off")),
                            ("off", StateConfig::new().on("TOGGLE_BOLD", "on")),
                        ],
                    ),
                )
                .child(
                    "underline",
                    region(
                        "off",
                        vec![
                            ("on", StateConfig::new().on("TOGGLE_UNDERLINE", "off")),
                            ("off", StateConfig::new().on("TOGGLE_UNDERLINE", "on")),
                        ],
                    ),
                ),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    assert_eq!(
        state.value,
        StateValue::compound([
            ("bold", StateValue::leaf("off")),
            ("underline", StateValue::leaf("off")),
        ])
    );

    // One region transitions; the other is untouched.
    let state = machine.transition(&state, "TOGGLE_BOLD").unwrap();
    assert!(state.matches("bold.on"));
    assert!(state.matches("underline.off"));
}

#[test]
fn one_event_can_drive_several_regions() {
    let machine = Machine::new(
        MachineConfig::new("p").state(
            StateConfig::new()
                .parallel()
                .child(
                    "a",
                    region(
                        "a1",
                        vec![
                            ("a1", StateConfig::new().on("GO", "a2")),
                            ("a2", StateConfig::new()),
                        ],
                    ),
                )
                .child(
                    "b",
                    region(
                        "b1",
                        vec![
                            ("b1", StateConfig::new().on("GO", "b2")),
                            ("b2", StateConfig::new()),
                        ],
                    ),
                ),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "GO").unwrap();
    assert!(state.matches("a.a2"));
    assert!(state.matches("b.b2"));
}

#[test]
fn conflicting_cross_region_transitions_keep_the_first() {
    // Both regions leave the parallel state on E; their exit sets overlap,
    // so the first selected transition preempts the second.
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("p")
                .child(
                    "p",
                    StateConfig::new()
                        .parallel()
                        .child(
                            "a",
                            region("a1", vec![("a1", StateConfig::new().on("E", "#first"))]),
                        )
                        .child(
                            "b",
                            region("b1", vec![("b1", StateConfig::new().on("E", "#second"))]),
                        ),
                )
                .child("first", StateConfig::new().id("first"))
                .child("second", StateConfig::new().id("second")),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "E").unwrap();
    assert!(state.matches("first"));
}

#[test]
fn eventless_closure_across_regions_reaches_quiescence_in_one_macrostep() {
    let machine = Machine::new(
        MachineConfig::new("flow").state(
            StateConfig::new()
                .parallel()
                .child(
                    "A",
                    region(
                        "A1",
                        vec![
                            ("A1", StateConfig::new().on("E", "A2")),
                            (
                                "A2",
                                StateConfig::new().always(
                                    TransitionConfig::to("A3")
                                        .guarded(guards::state_in("B.B3")),
                                ),
                            ),
                            (
                                "A3",
                                StateConfig::new().always(
                                    TransitionConfig::to("A4")
                                        .guarded(guards::state_in("B.B3")),
                                ),
                            ),
                            ("A4", StateConfig::new()),
                        ],
                    ),
                )
                .child(
                    "B",
                    region(
                        "B1",
                        vec![
                            ("B1", StateConfig::new().on("E", "B2")),
                            (
                                "B2",
                                StateConfig::new().always(
                                    TransitionConfig::to("B3")
                                        .guarded(guards::state_in("A.A2")),
                                ),
                            ),
                            (
                                "B3",
                                StateConfig::new().always(
                                    TransitionConfig::to("B4")
                                        .guarded(guards::state_in("A.A3")),
                                ),
                            ),
                            ("B4", StateConfig::new()),
                        ],
                    ),
                ),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "E").unwrap();
    assert_eq!(
        state.value,
        StateValue::compound([
            ("A", StateValue::leaf("A4")),
            ("B", StateValue::leaf("B4")),
        ])
    );
}

#[test]
fn parallel_done_requires_every_region_final() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("p")
                .child(
                    "p",
                    StateConfig::new()
                        .parallel()
                        .child(
                            "a",
                            region(
                                "work",
                                vec![
                                    ("work", StateConfig::new().on("DONE_A", "fin")),
                                    ("fin", StateConfig::new().final_state()),
                                ],
                            ),
                        )
                        .child(
                            "b",
                            region(
                                "work",
                                vec![
                                    ("work", StateConfig::new().on("DONE_B", "fin")),
                                    ("fin", StateConfig::new().final_state()),
                                ],
                            ),
                        )
                        .on_done("after"),
                )
                .child("after", StateConfig::new()),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "DONE_A").unwrap();
    assert!(state.matches("p"), "still inside the parallel state");
    let state = machine.transition(&state, "DONE_B").unwrap();
    assert!(state.matches("after"));
}

#[test]
fn shallow_history_restores_the_last_immediate_child() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("on")
                .child(
                    "on",
                    StateConfig::new()
                        .initial("a")
                        .child("a", StateConfig::new().on("NEXT", "b"))
                        .child("b", StateConfig::new())
                        .child("hist", StateConfig::new().history(HistoryKind::Shallow))
                        .on("OFF", "off"),
                )
                .child("off", StateConfig::new().on("ON", "on.hist")),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "NEXT").unwrap();
    assert!(state.matches("on.b"));

    let state = machine.transition(&state, "OFF").unwrap();
    assert!(state.matches("off"));

    let state = machine.transition(&state, "ON").unwrap();
    assert!(state.matches("on.b"), "history restored the b substate");
}

#[test]
fn history_without_a_record_enters_the_default_target() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("off")
                .child(
                    "on",
                    StateConfig::new()
                        .initial("a")
                        .child("a", StateConfig::new())
                        .child("b", StateConfig::new())
                        .child(
                            "hist",
                            StateConfig::new()
                                .history(HistoryKind::Shallow)
                                .target("b"),
                        ),
                )
                .child("off", StateConfig::new().on("ON", "on.hist")),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "ON").unwrap();
    assert!(state.matches("on.b"), "default target used with no record");
}

#[test]
fn deep_history_restores_nested_leaves() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("on")
                .child(
                    "on",
                    StateConfig::new()
                        .initial("outer1")
                        .child(
                            "outer1",
                            StateConfig::new()
                                .initial("inner1")
                                .child("inner1", StateConfig::new().on("DEEPEN", "inner2"))
                                .child("inner2", StateConfig::new()),
                        )
                        .child("outer2", StateConfig::new())
                        .child("hist", StateConfig::new().history(HistoryKind::Deep))
                        .on("OFF", "off"),
                )
                .child("off", StateConfig::new().on("ON", "on.hist")),
        ),
    )
    .unwrap();

    let state = machine.initial_state().unwrap();
    let state = machine.transition(&state, "DEEPEN").unwrap();
    assert!(state.matches("on.outer1.inner2"));

    let state = machine.transition(&state, "OFF").unwrap();
    let state = machine.transition(&state, "ON").unwrap();
    assert!(
        state.matches("on.outer1.inner2"),
        "deep history restored the nested leaf"
    );
}
