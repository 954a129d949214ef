//! Validation pipeline: the sole channel from raw input to validated emit.
//!
//! Applications register validators per event name. Every inbound client
//! message is classified to an event and must traverse a validator before
//! anything downstream can observe it. A validator receives a fixed number
//! of data slots (its registered arity minus the completion) and a
//! one-shot completion; accepting emits exactly one `Stream` event and
//! triggers the tail fan-out, anything else drops the message.
//!
//! Completions do not act directly: they push a [`PipelineOutcome`] onto the
//! node's dispatcher channel, and a single dispatcher task processes
//! outcomes in completion order. Synchronous validators therefore preserve
//! per-connection receive order.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::gateway::directory::Address;
use crate::gateway::events::{GatewayEvent, User};
use crate::gateway::metrics as metric;
use crate::gateway::server::SharedState;

/// What a validator decided about one message.
#[derive(Debug)]
pub enum Verdict {
    /// Approved. `Some(value)` replaces the message payload downstream.
    Accept(Option<Value>),
    /// Declined without an error.
    Reject,
    /// Failed with an error message.
    Fail(String),
}

/// One-shot completion handed to a validator. The `FnOnce` bound makes
/// "at most one validated emit per registration" a compile-time property.
pub type Completion = Box<dyn FnOnce(Verdict) + Send>;

/// A registered validator: data slots in, completion out.
///
/// The slot vector always has length `arity - 1`; positions the caller did
/// not fill are `None`, surplus caller arguments are truncated.
pub type ValidatorFn = Arc<dyn Fn(Vec<Option<Value>>, Completion) + Send + Sync>;

#[derive(Clone)]
pub struct Registration {
    pub arity: usize,
    pub validator: ValidatorFn,
}

/// Per-node mapping from event name to validators. Multiple registrations
/// per event are permitted; each runs with its own completion.
#[derive(Default)]
pub struct ValidatorRegistry {
    by_event: HashMap<String, Vec<Registration>>,
}

impl ValidatorRegistry {
    /// Register a validator for `event`. `arity` is the validator's declared
    /// argument count including the completion position, captured here and
    /// used to size the slot vector on every invocation.
    pub fn register(
        &mut self,
        event: &str,
        arity: usize,
        validator: impl Fn(Vec<Option<Value>>, Completion) + Send + Sync + 'static,
    ) {
        self.by_event.entry(event.to_owned()).or_default().push(Registration {
            arity,
            validator: Arc::new(validator),
        });
    }

    pub fn get(&self, event: &str) -> Option<&[Registration]> {
        self.by_event.get(event).map(Vec::as_slice)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.by_event.contains_key(event)
    }
}

/// Fit caller-supplied data arguments into a validator's slots: `arity - 1`
/// positions, missing present as `None`, extras truncated.
pub fn fit_slots(data: &[Value], arity: usize) -> Vec<Option<Value>> {
    let want = arity.saturating_sub(1);
    (0..want).map(|i| data.get(i).cloned()).collect()
}

/// A completed validation, queued for the dispatcher.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub event: String,
    pub slots: Vec<Option<Value>>,
    pub user: User,
    pub raw: String,
    pub verdict: Verdict,
}

/// Run every validator registered for `event` against one inbound message.
///
/// `args` are the positional data arguments; `user` and `raw` ride along
/// into the outcome. No registration → the message is dropped before any
/// delivery and `ValidationFailed` reports the missing validator.
pub async fn invoke(state: &SharedState, event: &str, args: Vec<Value>, user: User, raw: String) {
    let (registrations, outcome_tx, events) = {
        let st = state.read().await;
        (
            st.validators.get(event).map(<[Registration]>::to_vec),
            st.outcome_tx.clone(),
            st.events.clone(),
        )
    };

    let Some(registrations) = registrations else {
        counter!(metric::MESSAGES_REJECTED).increment(1);
        events.dispatch(GatewayEvent::ValidationFailed {
            event: event.to_owned(),
            user,
            raw,
            reason: "validator missing".to_owned(),
        });
        return;
    };

    for registration in registrations {
        let slots = fit_slots(&args, registration.arity);
        let outcome_tx = outcome_tx.clone();
        let event = event.to_owned();
        let user = user.clone();
        let raw = raw.clone();
        let sent_slots = slots.clone();
        let done: Completion = Box::new(move |verdict| {
            let _ = outcome_tx.send(PipelineOutcome {
                event,
                slots: sent_slots,
                user,
                raw,
                verdict,
            });
        });
        (registration.validator)(slots, done);
    }
}

/// Process validation outcomes in completion order: emit the stream event
/// and fan out on accept, report the drop otherwise.
pub async fn run_dispatcher(state: SharedState, mut rx: mpsc::UnboundedReceiver<PipelineOutcome>) {
    while let Some(outcome) = rx.recv().await {
        let events = {
            let st = state.read().await;
            st.events.clone()
        };

        match outcome.verdict {
            Verdict::Accept(transformed) => {
                counter!(metric::MESSAGES_VALIDATED).increment(1);
                let data: Vec<Value> = match transformed {
                    Some(value) => vec![value],
                    None => outcome
                        .slots
                        .iter()
                        .map(|slot| slot.clone().unwrap_or(Value::Null))
                        .collect(),
                };
                events.dispatch(GatewayEvent::Stream {
                    event: outcome.event,
                    data,
                    raw: outcome.raw.clone(),
                    user: outcome.user.clone(),
                });
                fanout(&state, &outcome.user, &outcome.raw).await;
            }
            Verdict::Reject => {
                counter!(metric::MESSAGES_REJECTED).increment(1);
                events.dispatch(GatewayEvent::ValidationFailed {
                    event: outcome.event,
                    user: outcome.user,
                    raw: outcome.raw,
                    reason: "validator declined".to_owned(),
                });
            }
            Verdict::Fail(reason) => {
                counter!(metric::MESSAGES_REJECTED).increment(1);
                events.dispatch(GatewayEvent::ValidationFailed {
                    event: outcome.event,
                    user: outcome.user,
                    raw: outcome.raw,
                    reason,
                });
            }
        }
    }
}

/// Deliver the raw payload of a validated message to every tailgator on the
/// originating connection. Failures are reported on the event hub and never
/// affect the local delivery.
async fn fanout(state: &SharedState, user: &User, raw: &str) {
    let (tail, broadcaster, events) = {
        let st = state.read().await;
        let Some(conn) = st.connections.get(&user.id) else {
            return;
        };
        if conn.tail.is_empty() {
            return;
        }
        (conn.tail.clone(), st.broadcaster.clone(), st.events.clone())
    };

    for follower in tail {
        if follower.is_empty() {
            continue;
        }
        let Some(address) = Address::parse(&follower) else {
            warn!(address = %follower, "fanout: unparseable tailgator address");
            continue;
        };

        let broadcaster = broadcaster.clone();
        let events = events.clone();
        let raw = raw.to_owned();
        let user = user.clone();
        tokio::spawn(async move {
            counter!(metric::TAIL_FORWARDS).increment(1);
            if let Err(e) = broadcaster
                .forward(&address.node_url, &address.conn_id, Value::String(raw.clone()))
                .await
            {
                warn!(peer = %address.node_url, error = %e, "fanout: tailgator delivery failed");
                events.dispatch(GatewayEvent::Invalid {
                    raw,
                    user: Some(user),
                    reason: format!("tail delivery to {} failed: {e}", address.node_url),
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fit_slots_pads_missing_positions() {
        let slots = fit_slots(&[json!("foo")], 5);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0], Some(json!("foo")));
        assert_eq!(slots[1], None);
        assert_eq!(slots[2], None);
        assert_eq!(slots[3], None);
    }

    #[test]
    fn fit_slots_truncates_extras() {
        let slots = fit_slots(&[json!(1), json!(2), json!(3)], 2);
        assert_eq!(slots, vec![Some(json!(1))]);
    }

    #[test]
    fn fit_slots_exact_fit() {
        let slots = fit_slots(&[json!(1), json!(2)], 3);
        assert_eq!(slots, vec![Some(json!(1)), Some(json!(2))]);
    }

    #[test]
    fn fit_slots_arity_one_has_no_data() {
        assert!(fit_slots(&[json!(1)], 1).is_empty());
        assert!(fit_slots(&[], 0).is_empty());
    }

    #[test]
    fn registry_keeps_multiple_registrations() {
        let mut registry = ValidatorRegistry::default();
        registry.register("foo", 2, |_slots, done| done(Verdict::Reject));
        registry.register("foo", 3, |_slots, done| done(Verdict::Accept(None)));
        assert_eq!(registry.get("foo").map(<[Registration]>::len), Some(2));
        assert!(registry.contains("foo"));
        assert!(!registry.contains("bar"));
    }

    #[test]
    fn registration_captures_arity() {
        let mut registry = ValidatorRegistry::default();
        registry.register("foo", 5, |slots, done| {
            assert_eq!(slots.len(), 4);
            done(Verdict::Accept(None));
        });
        let regs = registry.get("foo").unwrap();
        assert_eq!(regs[0].arity, 5);
        (regs[0].validator)(fit_slots(&[json!("x")], 5), Box::new(|_| {}));
    }
}
