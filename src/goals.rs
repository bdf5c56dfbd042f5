//! Goal-callback relay.
//!
//! The original collector monkey-patched the global analytics function to
//! spy on `reachGoal` calls. Here that is an explicit decorator: the relay
//! owns the original callback as a capability, forwards every call to it
//! unchanged, and emits a notice on the side when a goal fires. Host
//! behavior is never affected, whatever the argument shape.

use serde_json::Value;
use tokio::sync::mpsc;

/// One call to the external analytics function: an opaque argument list.
#[derive(Debug, Clone, Default)]
pub struct GoalCall {
    pub args: Vec<Value>,
}

impl GoalCall {
    pub fn new(args: Vec<Value>) -> Self {
        Self { args }
    }

    /// Extracts the goal identifier from a `(counter, "reachGoal", id, ..)`
    /// shaped call; `None` for anything else, including malformed shapes.
    fn reach_goal_id(&self) -> Option<String> {
        if self.args.get(1)?.as_str()? != "reachGoal" {
            return None;
        }
        match self.args.get(2)? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// Notice that a goal identifier was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalNotice {
    pub goal_id: String,
}

/// Wraps the original analytics callback.
pub struct GoalRelay<F>
where
    F: Fn(&GoalCall),
{
    original: F,
    notices: mpsc::UnboundedSender<GoalNotice>,
}

impl<F> GoalRelay<F>
where
    F: Fn(&GoalCall),
{
    pub fn new(original: F, notices: mpsc::UnboundedSender<GoalNotice>) -> Self {
        Self { original, notices }
    }

    /// Entry point the embedding page routes analytics calls through.
    /// The original callback is always invoked with the same arguments;
    /// a closed notice channel or a malformed call changes nothing.
    pub fn invoke(&self, call: &GoalCall) {
        if let Some(goal_id) = call.reach_goal_id() {
            let _ = self.notices.send(GoalNotice { goal_id });
        }
        (self.original)(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn relay_with_log() -> (
        GoalRelay<impl Fn(&GoalCall)>,
        Arc<Mutex<Vec<Vec<Value>>>>,
        mpsc::UnboundedReceiver<GoalNotice>,
    ) {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&forwarded);
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = GoalRelay::new(
            move |call: &GoalCall| log.lock().unwrap().push(call.args.clone()),
            tx,
        );
        (relay, forwarded, rx)
    }

    #[test]
    fn forwards_every_call_unchanged() {
        let (relay, forwarded, _rx) = relay_with_log();

        let shapes: Vec<Vec<Value>> = vec![
            vec![],
            vec![json!(42)],
            vec![json!(42), json!("reachGoal"), json!("SIGNUP")],
            vec![json!(42), json!("hit"), json!("/page")],
            vec![json!(null), json!(["weird"]), json!({"x": 1})],
        ];
        for args in &shapes {
            relay.invoke(&GoalCall::new(args.clone()));
        }
        assert_eq!(*forwarded.lock().unwrap(), shapes);
    }

    #[test]
    fn reach_goal_calls_emit_notices() {
        let (relay, _forwarded, mut rx) = relay_with_log();

        relay.invoke(&GoalCall::new(vec![
            json!(42),
            json!("reachGoal"),
            json!("REG_SEND_FINAL"),
        ]));
        assert_eq!(
            rx.try_recv().unwrap(),
            GoalNotice {
                goal_id: "REG_SEND_FINAL".into()
            }
        );

        // Numeric goal ids come through as their decimal form.
        relay.invoke(&GoalCall::new(vec![
            json!(42),
            json!("reachGoal"),
            json!(281047303),
        ]));
        assert_eq!(rx.try_recv().unwrap().goal_id, "281047303");
    }

    #[test]
    fn non_goal_and_malformed_calls_emit_nothing() {
        let (relay, forwarded, mut rx) = relay_with_log();

        relay.invoke(&GoalCall::new(vec![json!(42), json!("hit")]));
        relay.invoke(&GoalCall::new(vec![json!("reachGoal")]));
        relay.invoke(&GoalCall::new(vec![
            json!(42),
            json!("reachGoal"),
            json!({"not": "an id"}),
        ]));
        assert!(rx.try_recv().is_err());
        // ...but all three were still forwarded.
        assert_eq!(forwarded.lock().unwrap().len(), 3);
    }

    #[test]
    fn closed_channel_does_not_break_forwarding() {
        let (relay, forwarded, rx) = relay_with_log();
        drop(rx);
        relay.invoke(&GoalCall::new(vec![
            json!(42),
            json!("reachGoal"),
            json!("SIGNUP"),
        ]));
        assert_eq!(forwarded.lock().unwrap().len(), 1);
    }
}
