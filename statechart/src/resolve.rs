//! The action resolver: interprets action descriptors against the current
//! context and event, producing the visible action list, the raised-event
//! queue, and the updated context.
//!
//! The resolver never performs effects. `assign` runs here (context updates
//! must be observable by later actions in the same list); everything else
//! is concretized — expressions evaluated, registry names resolved, exec
//! closures pinned to the context snapshot — and left for the interpreter.

use crate::machine::Machine;
use serde_json::Value;
use statechart_core::event::names;
use statechart_core::{
    Action, DelaySpec, Envelope, EventExpr, ExecFn, SendId, SendSpec, SendTarget, StateValue,
    StopRef, ValueExpr,
};

/// Resolver output for one microstep's action list.
#[derive(Debug)]
pub(crate) struct Resolved {
    /// Concretized actions, in occurrence order.
    pub actions: Vec<Action>,
    /// Events raised into the internal queue.
    pub raised: Vec<Envelope>,
    /// The context after all `assign` updaters.
    pub context: Value,
}

pub(crate) fn resolve(
    machine: &Machine,
    list: &[Action],
    context: &Value,
    envelope: &Envelope,
    state_value: &StateValue,
) -> Resolved {
    let mut out = Resolved {
        actions: Vec::new(),
        raised: Vec::new(),
        context: context.clone(),
    };
    for action in list {
        resolve_one(machine, action, envelope, state_value, &mut out);
    }
    out
}

fn resolve_one(
    machine: &Machine,
    action: &Action,
    envelope: &Envelope,
    state_value: &StateValue,
    out: &mut Resolved,
) {
    match action {
        Action::Assign(updater) => match updater.call(&out.context, envelope) {
            Ok(partial) => {
                merge_context(&mut out.context, partial);
                out.actions.push(action.clone());
            }
            Err(err) => raise_execution_error(out, &err.to_string()),
        },
        Action::Raise(event) => out.raised.push(Envelope::raised(event.clone())),
        Action::Send(spec) => {
            let event = spec.event.resolve(&out.context, envelope);
            let delay = match &spec.delay {
                None => None,
                Some(DelaySpec::Ms(ms)) => Some(DelaySpec::Ms(*ms)),
                Some(DelaySpec::Named(name)) => match machine.options().delays.get(name) {
                    Some(f) => Some(DelaySpec::Ms(f.call(&out.context, envelope))),
                    None => {
                        raise_execution_error(out, &format!("delay '{name}' is not registered"));
                        return;
                    }
                },
            };
            if matches!(spec.to, Some(SendTarget::Internal)) {
                out.raised.push(Envelope::raised(event));
                return;
            }
            let id = spec
                .id
                .clone()
                .unwrap_or_else(|| SendId::new(event.name.clone()));
            out.actions.push(Action::Send(SendSpec {
                event: EventExpr::Literal(event),
                to: spec.to.clone(),
                delay,
                id: Some(id),
            }));
        }
        Action::Cancel(_) | Action::Invoke(_) => out.actions.push(action.clone()),
        Action::Stop(stop) => {
            let resolved = match stop {
                StopRef::Id(id) => id.clone(),
                StopRef::Expr(f) => match f.call(&out.context, envelope) {
                    Value::String(id) => id.into(),
                    other => other.to_string().into(),
                },
            };
            out.actions.push(Action::Stop(StopRef::Id(resolved)));
        }
        Action::Log { label, message } => out.actions.push(Action::Log {
            label: label.clone(),
            message: ValueExpr::Literal(message.resolve(&out.context, envelope)),
        }),
        Action::Escalate(data) => out.actions.push(Action::Escalate(ValueExpr::Literal(
            data.resolve(&out.context, envelope),
        ))),
        Action::Choose(branches) => {
            for branch in branches {
                let pass = match &branch.guard {
                    None => true,
                    Some(guard) => match crate::transition::evaluate_guard(
                        machine,
                        guard,
                        &out.context,
                        envelope,
                        state_value,
                    ) {
                        Ok(pass) => pass,
                        Err(err) => {
                            raise_execution_error(out, &err.to_string());
                            return;
                        }
                    },
                };
                if pass {
                    for inner in &branch.actions {
                        resolve_one(machine, inner, envelope, state_value, out);
                    }
                    return;
                }
            }
        }
        Action::Pure(factory) => {
            for inner in factory.call(&out.context, envelope) {
                resolve_one(machine, &inner, envelope, state_value, out);
            }
        }
        Action::Custom { name, exec } => {
            if exec.is_none() {
                if let Some(registered) = machine.options().actions.get(name) {
                    let registered = registered.clone();
                    resolve_one(machine, &registered, envelope, state_value, out);
                    return;
                }
            }
            // Pin the effect to the context in force at this position.
            let snapshot = out.context.clone();
            let wrapped = exec.clone().map(|effect| {
                ExecFn::new(move |_ctx: &Value, ev: &Envelope| effect.call(&snapshot, ev))
            });
            out.actions.push(Action::Custom {
                name: name.clone(),
                exec: wrapped,
            });
        }
    }
}

/// Shallow-merge a partial update into the context. Non-object updates
/// replace the context wholesale.
fn merge_context(context: &mut Value, partial: Value) {
    match (context.as_object_mut(), partial) {
        (Some(map), Value::Object(update)) => {
            for (key, value) in update {
                map.insert(key, value);
            }
        }
        (_, other) => *context = other,
    }
}

fn raise_execution_error(out: &mut Resolved, message: &str) {
    out.raised.push(Envelope::error(
        names::ERROR_EXECUTION,
        Value::String(message.to_owned()),
    ));
}
