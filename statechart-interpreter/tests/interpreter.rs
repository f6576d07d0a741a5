//! Interpreter lifecycle: queue draining, subscribers, deferral, delayed
//! sends, batching, strict mode, and stop semantics.

use serde_json::json;
use statechart::{
    actions, Machine, MachineConfig, SendId, StateConfig, TransitionConfig,
};
use statechart_interpreter::{interpret, Interpreter, InterpreterOptions, Status};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn toggle() -> Machine {
    Machine::new(
        MachineConfig::new("toggle").state(
            StateConfig::new()
                .initial("off")
                .child("off", StateConfig::new().on("TOGGLE", "on"))
                .child("on", StateConfig::new().on("TOGGLE", "off")),
        ),
    )
    .unwrap()
}

fn timer_machine() -> Machine {
    Machine::new(
        MachineConfig::new("t").state(
            StateConfig::new()
                .initial("idle")
                .child("idle", StateConfig::new().on("START", "doing"))
                .child(
                    "doing",
                    StateConfig::new().after(100u64, "idle").on(
                        "CANCEL",
                        TransitionConfig::actions_only(vec![actions::cancel(
                            "statechart.after(100)#t.doing",
                        )]),
                    ),
                ),
        ),
    )
    .unwrap()
}

#[tokio::test]
async fn start_notifies_subscribers_with_the_initial_state() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut service = interpret(toggle());
    let sink = Arc::clone(&seen);
    service.subscribe(move |state| sink.lock().unwrap().push(state.value.clone()));

    service.start().unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(service.state().unwrap().matches("off"));
}

#[tokio::test]
async fn send_is_synchronous_and_ordered() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut service = interpret(toggle());
    let first = Arc::clone(&seen);
    service.subscribe(move |state| first.lock().unwrap().push(("a", state.value.clone())));
    let second = Arc::clone(&seen);
    service.subscribe(move |state| second.lock().unwrap().push(("b", state.value.clone())));

    service.start().unwrap();
    service.send("TOGGLE").unwrap();

    // Subscribers already observed the post-macrostep state, in order.
    assert!(service.state().unwrap().matches("on"));
    let seen = seen.lock().unwrap();
    let last_two: Vec<&str> = seen.iter().rev().take(2).map(|(who, _)| *who).collect();
    assert_eq!(last_two, vec!["b", "a"]);
}

#[tokio::test]
async fn events_before_start_are_deferred_by_default() {
    let mut service = interpret(toggle());
    service.send("TOGGLE").unwrap();
    service.start().unwrap();
    assert!(service.state().unwrap().matches("on"));
}

#[tokio::test]
async fn events_before_start_are_dropped_without_deferral() {
    let mut service = Interpreter::with_options(
        toggle(),
        InterpreterOptions {
            defer_events: false,
            id: None,
        },
    );
    service.send("TOGGLE").unwrap();
    service.start().unwrap();
    assert!(service.state().unwrap().matches("off"));
}

#[tokio::test(start_paused = true)]
async fn delayed_transitions_fire_after_their_delay() {
    let mut service = interpret(timer_machine());
    service.start().unwrap();
    service.send("START").unwrap();
    assert!(service.state().unwrap().matches("doing"));

    tokio::time::advance(Duration::from_millis(110)).await;
    service.run_until_idle().await;
    assert!(service.state().unwrap().matches("idle"));
}

#[tokio::test(start_paused = true)]
async fn cancelled_delays_never_fire() {
    let mut service = interpret(timer_machine());
    service.start().unwrap();
    service.send("START").unwrap();

    tokio::time::advance(Duration::from_millis(50)).await;
    service.run_until_idle().await;
    service.send("CANCEL").unwrap();

    tokio::time::advance(Duration::from_millis(200)).await;
    service.run_until_idle().await;
    assert!(service.state().unwrap().matches("doing"));
}

#[tokio::test(start_paused = true)]
async fn rehydrated_states_rearm_their_delays() {
    let machine = timer_machine();
    let doing = machine
        .transition(&machine.initial_state().unwrap(), "START")
        .unwrap();
    let persisted = doing.to_json();

    let rebuilt = statechart::State::create(persisted).unwrap();
    let mut service = interpret(machine);
    service.start_with(rebuilt).unwrap();
    assert!(service.state().unwrap().matches("doing"));

    tokio::time::advance(Duration::from_millis(110)).await;
    service.run_until_idle().await;
    assert!(service.state().unwrap().matches("idle"));
}

#[tokio::test]
async fn batch_notifies_once_per_event() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut service = interpret(toggle());
    let sink = Arc::clone(&seen);
    service.subscribe(move |state| sink.lock().unwrap().push(state.value.clone()));

    service.start().unwrap();
    service.batch(["TOGGLE", "TOGGLE", "TOGGLE"]).unwrap();

    let values: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect();
    assert_eq!(values, vec!["off", "on", "off", "on"]);
}

#[tokio::test]
async fn stop_is_terminal() {
    let stopped = Arc::new(Mutex::new(false));
    let mut service = interpret(toggle());
    let flag = Arc::clone(&stopped);
    service.on_stop(move || *flag.lock().unwrap() = true);

    service.start().unwrap();
    service.stop();
    assert_eq!(service.status(), Status::Stopped);
    assert!(*stopped.lock().unwrap());

    // Sends after stop are ignored, not errors.
    service.send("TOGGLE").unwrap();
    assert!(service.state().unwrap().matches("off"));
    assert!(service.start().is_err());
}

#[tokio::test]
async fn strict_unhandled_events_stop_the_interpreter() {
    let machine = Machine::new(
        MachineConfig::new("m").strict().state(
            StateConfig::new()
                .initial("a")
                .child("a", StateConfig::new().on("KNOWN", "b"))
                .child("b", StateConfig::new()),
        ),
    )
    .unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let mut service = interpret(machine);
    let sink = Arc::clone(&errors);
    service.on_error(move |err| sink.lock().unwrap().push(err.to_string()));

    service.start().unwrap();
    service.send("UNKNOWN").unwrap();

    assert_eq!(service.status(), Status::Stopped);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("UNKNOWN"));
}

#[tokio::test]
async fn done_machines_invoke_on_done_and_stop() {
    let machine = Machine::new(
        MachineConfig::new("m").context(json!({})).state(
            StateConfig::new()
                .initial("a")
                .child("a", StateConfig::new().on("END", "fin"))
                .child("fin", StateConfig::new().final_state()),
        ),
    )
    .unwrap();

    let done = Arc::new(Mutex::new(None));
    let mut service = interpret(machine);
    let sink = Arc::clone(&done);
    service.on_done(move |state| *sink.lock().unwrap() = Some(state.value.clone()));

    service.start().unwrap();
    service.send("END").unwrap();

    assert_eq!(service.status(), Status::Stopped);
    assert_eq!(
        done.lock().unwrap().as_ref().map(|v| v.to_string()),
        Some("fin".to_owned())
    );
}

#[tokio::test]
async fn unsubscribe_removes_the_observer() {
    let count = Arc::new(Mutex::new(0usize));
    let mut service = interpret(toggle());
    let sink = Arc::clone(&count);
    let sub = service.subscribe(move |_| *sink.lock().unwrap() += 1);

    service.start().unwrap();
    service.unsubscribe(sub);
    service.send("TOGGLE").unwrap();
    assert_eq!(*count.lock().unwrap(), 1, "only the start notification");
}

#[tokio::test(start_paused = true)]
async fn user_sends_can_be_cancelled_by_id() {
    let machine = Machine::new(
        MachineConfig::new("m").state(
            StateConfig::new()
                .initial("a")
                .child(
                    "a",
                    StateConfig::new()
                        .on(
                            "ARM",
                            TransitionConfig::actions_only(vec![actions::send("FIRE")
                                .delay(1_000u64)
                                .id("the-fuse")
                                .into()]),
                        )
                        .on(
                            "DISARM",
                            TransitionConfig::actions_only(vec![actions::cancel(SendId::new(
                                "the-fuse",
                            ))]),
                        )
                        .on("FIRE", "boom"),
                )
                .child("boom", StateConfig::new()),
        ),
    )
    .unwrap();

    let mut service = interpret(machine);
    service.start().unwrap();
    service.send("ARM").unwrap();
    service.send("DISARM").unwrap();
    tokio::time::advance(Duration::from_millis(2_000)).await;
    service.run_until_idle().await;
    assert!(service.state().unwrap().matches("a"));
}
