//! End-to-end scenarios across the workspace: machine + interpreter +
//! behavior adapters working together.
//!
//! Each test is one of the canonical runtime scenarios: fetch via a
//! promise actor, rehydration, eventless closure across parallel regions,
//! delayed sends against a paused clock, internal queue ordering, child
//! escalation, and auto-forwarding.

use serde_json::json;
use statechart::{
    actions, guards, Event, InvokeConfig, Machine, MachineConfig, MachineOptions, State,
    StateConfig, StateValue, TransitionConfig,
};
use statechart_core::InvokeId;
use statechart_interpreter::{behaviors, interpret};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fetch: idle → loading (promise actor) → success
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn fetch_machine() -> Machine {
    Machine::with_options(
        MachineConfig::new("fetch").context(json!({"data": null})).state(
            StateConfig::new()
                .initial("idle")
                .child("idle", StateConfig::new().on("FETCH", "loading"))
                .child(
                    "loading",
                    StateConfig::new().invoke(
                        InvokeConfig::kind("fetchData").id("fetcher").on_done(
                            TransitionConfig::to("success")
                                .guarded(guards::from_fn(|_ctx, ev| {
                                    ev.data.as_str().is_some_and(|s| !s.is_empty())
                                }))
                                .action(actions::assign(|_ctx, ev| {
                                    json!({"data": ev.data.clone()})
                                })),
                        ),
                    ),
                )
                .child("success", StateConfig::new().final_state()),
        ),
        MachineOptions::new().actor(
            "fetchData",
            behaviors::promise(|_input| async { Ok(json!("fake data")) }),
        ),
    )
    .unwrap()
}

#[tokio::test]
async fn fetch_resolves_into_the_final_state() {
    let mut service = interpret(fetch_machine());
    service.start().unwrap();
    service.send("FETCH").unwrap();

    let done = service.wait_done().await.unwrap();
    assert!(done.matches("success"));
    assert_eq!(done.context["data"], json!("fake data"));
}

#[tokio::test]
async fn rehydrated_states_resume_where_they_left_off() {
    let machine = fetch_machine();

    // Persist the loading state, as if the process had died mid-fetch.
    let loading = machine
        .transition(&machine.initial_state().unwrap(), "FETCH")
        .unwrap();
    let snapshot = loading.to_json();

    // Apply the completion event to the rehydrated snapshot offline.
    let rebuilt = machine.resolve_state(State::create(snapshot).unwrap()).unwrap();
    let completed = machine
        .transition(
            &rebuilt,
            Event::with_data("done.invoke.fetcher", json!("persisted data")),
        )
        .unwrap();

    // Starting from the persisted result lands directly in success.
    let mut service = interpret(machine);
    service.start_with(completed).unwrap();
    let state = service.state().unwrap();
    assert!(state.matches("success"));
    assert_eq!(state.context["data"], json!("persisted data"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Eventless closure across parallel regions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn parallel_regions_cascade_to_quiescence_in_one_macrostep() {
    let region = |states: Vec<(&str, StateConfig)>| {
        let mut cfg = StateConfig::new().initial(states[0].0.to_owned());
        for (key, state) in states {
            cfg = cfg.child(key, state);
        }
        cfg
    };

    let machine = Machine::new(
        MachineConfig::new("flow").state(
            StateConfig::new()
                .parallel()
                .child(
                    "A",
                    region(vec![
                        ("A1", StateConfig::new().on("E", "A2")),
                        (
                            "A2",
                            StateConfig::new().always(
                                TransitionConfig::to("A3").guarded(guards::state_in("B.B3")),
                            ),
                        ),
                        (
                            "A3",
                            StateConfig::new().always(
                                TransitionConfig::to("A4").guarded(guards::state_in("B.B3")),
                            ),
                        ),
                        ("A4", StateConfig::new()),
                    ]),
                )
                .child(
                    "B",
                    region(vec![
                        ("B1", StateConfig::new().on("E", "B2")),
                        (
                            "B2",
                            StateConfig::new().always(
                                TransitionConfig::to("B3").guarded(guards::state_in("A.A2")),
                            ),
                        ),
                        (
                            "B3",
                            StateConfig::new().always(
                                TransitionConfig::to("B4").guarded(guards::state_in("A.A3")),
                            ),
                        ),
                        ("B4", StateConfig::new()),
                    ]),
                ),
        ),
    )
    .unwrap();

    let mut service = interpret(machine);
    service.start().unwrap();
    service.send("E").unwrap();

    assert_eq!(
        service.state().unwrap().value,
        StateValue::compound([
            ("A", StateValue::leaf("A4")),
            ("B", StateValue::leaf("B4")),
        ])
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delayed sends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn delayed_machine() -> Machine {
    Machine::new(
        MachineConfig::new("d").state(
            StateConfig::new()
                .initial("idle")
                .child("idle", StateConfig::new().on("START", "doing"))
                .child(
                    "doing",
                    StateConfig::new().after(100u64, "idle").on(
                        "CANCEL",
                        TransitionConfig::actions_only(vec![actions::cancel(
                            "statechart.after(100)#d.doing",
                        )]),
                    ),
                ),
        ),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn delayed_transition_fires_once_the_clock_advances() {
    let mut service = interpret(delayed_machine());
    service.start().unwrap();
    service.send("START").unwrap();
    assert!(service.state().unwrap().matches("doing"));

    tokio::time::advance(Duration::from_millis(110)).await;
    service.run_until_idle().await;
    assert!(service.state().unwrap().matches("idle"));
}

#[tokio::test(start_paused = true)]
async fn cancelling_before_the_delay_stays_put() {
    let mut service = interpret(delayed_machine());
    service.start().unwrap();
    service.send("START").unwrap();

    tokio::time::advance(Duration::from_millis(50)).await;
    service.run_until_idle().await;
    service.send("CANCEL").unwrap();

    tokio::time::advance(Duration::from_millis(300)).await;
    service.run_until_idle().await;
    assert!(service.state().unwrap().matches("doing"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal queue ordering: eventless before raised
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn eventless_transitions_resolve_before_raised_events() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("a")
                .child("a", StateConfig::new().on("FOO", "b"))
                .child(
                    "b",
                    StateConfig::new().entry(actions::raise("BAR")).always("c"),
                )
                .child("c", StateConfig::new().on("BAR", "e"))
                .child("e", StateConfig::new()),
        ),
    )
    .unwrap();

    let mut service = interpret(machine);
    service.start().unwrap();
    service.send("FOO").unwrap();
    assert!(service.state().unwrap().matches("e"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Escalation from an invoked machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn escalated_errors_select_the_parent_on_error_transition() {
    let child = Machine::new(
        MachineConfig::new("child").state(
            StateConfig::new()
                .initial("start")
                .child("start", StateConfig::new().entry(actions::escalate("oops"))),
        ),
    )
    .unwrap();

    let parent = Machine::with_options(
        MachineConfig::new("parent").state(
            StateConfig::new()
                .initial("one")
                .child(
                    "one",
                    StateConfig::new().invoke(
                        InvokeConfig::kind("child").id("kid").on_error(
                            TransitionConfig::to("two").guarded(guards::from_fn(
                                |_ctx, ev| ev.data == json!("oops"),
                            )),
                        ),
                    ),
                )
                .child("two", StateConfig::new()),
        ),
        MachineOptions::new().actor("child", behaviors::machine_actor(child)),
    )
    .unwrap();

    let mut service = interpret(parent);
    service.start().unwrap();
    let state = service.wait_until(|s| s.matches("two")).await.unwrap();
    assert!(state.matches("two"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auto-forwarding: children observe each event before the parent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn auto_forwarded_events_reach_the_child_and_the_parent() {
    let machine = Machine::with_options(
        MachineConfig::new("m").context(json!({"parent_count": 0})).state(
            StateConfig::new().initial("active").child(
                "active",
                StateConfig::new()
                    .invoke(InvokeConfig::kind("counter").id("counter").auto_forward())
                    .on(
                        "INC",
                        TransitionConfig::actions_only(vec![actions::assign(|ctx, _ev| {
                            json!({"parent_count": ctx["parent_count"].as_i64().unwrap_or(0) + 1})
                        })]),
                    ),
            ),
        ),
        MachineOptions::new().actor(
            "counter",
            behaviors::reducer(json!(0), |state, envelope| {
                if envelope.name == "INC" {
                    json!(state.as_i64().unwrap_or(0) + 1)
                } else {
                    state
                }
            }),
        ),
    )
    .unwrap();

    let mut service = interpret(machine);
    service.start().unwrap();
    service.send("INC").unwrap();
    service.send("INC").unwrap();
    service.send("INC").unwrap();
    service.run_until_idle().await;

    assert_eq!(service.state().unwrap().context["parent_count"], json!(3));
    let child = service.child(&InvokeId::new("counter")).unwrap();
    assert_eq!(child.snapshot(), json!(3), "every event was forwarded");
}
