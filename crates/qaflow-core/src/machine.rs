//! Run-lifecycle state machine.
//!
//! Pure transition function plus an in-memory idempotency guard. No I/O:
//! callers persist the returned log entry and new state themselves. The
//! guard tolerates at-least-once delivery of external events — a re-delivered
//! transition request is answered with the already-computed state and no
//! second decision-log entry.

use crate::error::{QaflowError, Result};
use crate::run::DecisionLogEntry;
use crate::types::{ReasonCode, RunEvent, RunState};
use chrono::Utc;
use std::collections::{HashMap, HashSet};

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// The tabled target for `(state, event)`, or `None` when the pair is not a
/// legal transition. Terminal states have no rows at all.
pub fn target_for(state: RunState, event: RunEvent) -> Option<RunState> {
    use RunEvent as E;
    use RunState as S;

    if state.is_terminal() {
        return None;
    }
    match (state, event) {
        (S::Created, E::StartParsing) => Some(S::Parsing),
        (S::Parsing, E::ParsingComplete) => Some(S::Generating),
        (S::Generating, E::GenerationComplete) => Some(S::AwaitingApproval),
        (S::AwaitingApproval, E::Approved) => Some(S::Executing),
        (S::AwaitingApproval, E::Rejected) => Some(S::Generating),
        (S::Executing, E::ExecutionComplete) => Some(S::CodexReviewing),
        (S::CodexReviewing, E::ReviewComplete) => Some(S::ReportReady),
        (S::ReportReady, E::Confirmed) => Some(S::Completed),
        (S::ReportReady, E::Retest) => Some(S::Created),
        (S::AwaitingApproval | S::ReportReady, E::Timeout) => Some(S::Failed),
        (_, E::Error) => Some(S::Failed),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Request / outcome types
// ---------------------------------------------------------------------------

/// A transition request as delivered from the outside world.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub run_id: String,
    pub current_state: RunState,
    pub event: RunEvent,
    /// Shard identifier for fanned-out delivery; different shards of the
    /// same logical transition are independent.
    pub shard: Option<String>,
    /// Collaborator error-type tag, consulted for `ERROR` events.
    pub error_tag: Option<String>,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl TransitionRequest {
    pub fn new(run_id: impl Into<String>, current_state: RunState, event: RunEvent) -> Self {
        Self {
            run_id: run_id.into(),
            current_state,
            event,
            shard: None,
            error_tag: None,
            reason: None,
            metadata: None,
        }
    }

    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    pub fn with_error_tag(mut self, tag: impl Into<String>) -> Self {
        self.error_tag = Some(tag.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outcome of a successful transition. `no_op` marks a re-delivered request
/// that was absorbed by the idempotency guard; such outcomes carry no log
/// entry.
#[derive(Debug, Clone)]
pub struct Transition {
    pub new_state: RunState,
    pub no_op: bool,
    pub log_entry: Option<DecisionLogEntry>,
    pub reason_code: Option<ReasonCode>,
}

// ---------------------------------------------------------------------------
// Idempotency key
// ---------------------------------------------------------------------------

/// `(from, to, event, shard)` — bucketed per run id so a finished run's keys
/// can be evicted in one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeenKey {
    from: RunState,
    to: RunState,
    event: RunEvent,
    shard: Option<String>,
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// Transition function + idempotency guard. The key set lives only in
/// process memory; losing it on restart is safe because a duplicate request
/// against a persisted run is rejected as "not the current state" rather
/// than double-applied.
#[derive(Debug, Default)]
pub struct StateMachine {
    seen: HashMap<String, HashSet<SeenKey>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `req`. Errors leave the caller's state untouched: a pair not in
    /// the table yields `InvalidTransition`, any event against a terminal
    /// state yields `TerminalState`.
    pub fn transition(&mut self, req: &TransitionRequest) -> Result<Transition> {
        let target = match target_for(req.current_state, req.event) {
            Some(t) => t,
            None if req.current_state.is_terminal() => {
                return Err(QaflowError::TerminalState {
                    state: req.current_state.to_string(),
                    event: req.event.to_string(),
                })
            }
            None => {
                return Err(QaflowError::InvalidTransition {
                    from: req.current_state.to_string(),
                    event: req.event.to_string(),
                })
            }
        };

        let reason_code = match req.event {
            RunEvent::Timeout => Some(ReasonCode::for_timeout(req.current_state)),
            RunEvent::Error => Some(ReasonCode::from_error_tag(req.error_tag.as_deref())),
            _ => None,
        };

        let key = SeenKey {
            from: req.current_state,
            to: target,
            event: req.event,
            shard: req.shard.clone(),
        };
        let keys = self.seen.entry(req.run_id.clone()).or_default();
        if keys.contains(&key) {
            return Ok(Transition {
                new_state: target,
                no_op: true,
                log_entry: None,
                reason_code,
            });
        }
        keys.insert(key);

        let entry = DecisionLogEntry {
            timestamp: Utc::now(),
            from_state: req.current_state,
            to_state: target,
            event: req.event,
            reason: req
                .reason
                .clone()
                .or_else(|| reason_code.map(|c| c.to_string())),
            metadata: req.metadata.clone(),
        };

        Ok(Transition {
            new_state: target,
            no_op: false,
            log_entry: Some(entry),
            reason_code,
        })
    }

    /// Evict every idempotency key held for `run_id`. Called when a run
    /// reaches a terminal state so the key set stays bounded in a long-lived
    /// process.
    pub fn clear_keys_for_run(&mut self, run_id: &str) {
        self.seen.remove(run_id);
    }

    /// Number of runs currently holding keys.
    pub fn tracked_runs(&self) -> usize {
        self.seen.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[(RunState, RunEvent, RunState)] = &[
        (RunState::Created, RunEvent::StartParsing, RunState::Parsing),
        (
            RunState::Parsing,
            RunEvent::ParsingComplete,
            RunState::Generating,
        ),
        (
            RunState::Generating,
            RunEvent::GenerationComplete,
            RunState::AwaitingApproval,
        ),
        (
            RunState::AwaitingApproval,
            RunEvent::Approved,
            RunState::Executing,
        ),
        (
            RunState::AwaitingApproval,
            RunEvent::Rejected,
            RunState::Generating,
        ),
        (
            RunState::Executing,
            RunEvent::ExecutionComplete,
            RunState::CodexReviewing,
        ),
        (
            RunState::CodexReviewing,
            RunEvent::ReviewComplete,
            RunState::ReportReady,
        ),
        (
            RunState::ReportReady,
            RunEvent::Confirmed,
            RunState::Completed,
        ),
        (RunState::ReportReady, RunEvent::Retest, RunState::Created),
        (
            RunState::AwaitingApproval,
            RunEvent::Timeout,
            RunState::Failed,
        ),
        (RunState::ReportReady, RunEvent::Timeout, RunState::Failed),
    ];

    #[test]
    fn every_tabled_pair_succeeds() {
        for &(from, event, to) in TABLE {
            let mut machine = StateMachine::new();
            let req = TransitionRequest::new("run-1", from, event);
            let t = machine.transition(&req).unwrap();
            assert_eq!(t.new_state, to, "{from} --{event}--> expected {to}");
            assert!(!t.no_op);
            assert!(t.log_entry.is_some());
        }
    }

    #[test]
    fn error_from_every_non_terminal_state_fails_the_run() {
        for &state in RunState::all() {
            let mut machine = StateMachine::new();
            let req = TransitionRequest::new("run-1", state, RunEvent::Error);
            if state.is_terminal() {
                assert!(machine.transition(&req).is_err());
            } else {
                let t = machine.transition(&req).unwrap();
                assert_eq!(t.new_state, RunState::Failed);
                assert_eq!(t.reason_code, Some(ReasonCode::InternalError));
            }
        }
    }

    #[test]
    fn untabled_pairs_are_rejected() {
        let tabled: std::collections::HashSet<(RunState, RunEvent)> = TABLE
            .iter()
            .map(|&(from, event, _)| (from, event))
            .collect();
        for &state in RunState::all() {
            for &event in RunEvent::all() {
                if event == RunEvent::Error || tabled.contains(&(state, event)) {
                    continue;
                }
                let mut machine = StateMachine::new();
                let req = TransitionRequest::new("run-1", state, event);
                let err = machine.transition(&req).unwrap_err();
                match err {
                    QaflowError::InvalidTransition { .. } | QaflowError::TerminalState { .. } => {}
                    other => panic!("unexpected error for ({state}, {event}): {other}"),
                }
            }
        }
    }

    #[test]
    fn no_event_leaves_terminal_states() {
        for &state in &[RunState::Completed, RunState::Failed] {
            for &event in RunEvent::all() {
                let mut machine = StateMachine::new();
                let req = TransitionRequest::new("run-1", state, event);
                assert!(matches!(
                    machine.transition(&req),
                    Err(QaflowError::TerminalState { .. })
                ));
            }
        }
    }

    #[test]
    fn duplicate_delivery_is_a_no_op() {
        let mut machine = StateMachine::new();
        let req = TransitionRequest::new("run-1", RunState::Created, RunEvent::StartParsing);

        let first = machine.transition(&req).unwrap();
        assert!(!first.no_op);
        assert!(first.log_entry.is_some());

        let second = machine.transition(&req).unwrap();
        assert!(second.no_op);
        assert!(second.log_entry.is_none());
        assert_eq!(second.new_state, first.new_state);
    }

    #[test]
    fn different_shards_are_independent() {
        let mut machine = StateMachine::new();
        let a = TransitionRequest::new("run-1", RunState::Created, RunEvent::StartParsing)
            .with_shard("shard-a");
        let b = TransitionRequest::new("run-1", RunState::Created, RunEvent::StartParsing)
            .with_shard("shard-b");

        assert!(!machine.transition(&a).unwrap().no_op);
        assert!(!machine.transition(&b).unwrap().no_op);
        assert!(machine.transition(&a).unwrap().no_op);
    }

    #[test]
    fn different_runs_do_not_share_keys() {
        let mut machine = StateMachine::new();
        let a = TransitionRequest::new("run-1", RunState::Created, RunEvent::StartParsing);
        let b = TransitionRequest::new("run-2", RunState::Created, RunEvent::StartParsing);
        assert!(!machine.transition(&a).unwrap().no_op);
        assert!(!machine.transition(&b).unwrap().no_op);
    }

    #[test]
    fn clear_keys_for_run_evicts() {
        let mut machine = StateMachine::new();
        let req = TransitionRequest::new("run-1", RunState::Created, RunEvent::StartParsing);
        machine.transition(&req).unwrap();
        assert_eq!(machine.tracked_runs(), 1);

        machine.clear_keys_for_run("run-1");
        assert_eq!(machine.tracked_runs(), 0);
        // After eviction the same request is applied fresh again.
        assert!(!machine.transition(&req).unwrap().no_op);
    }

    #[test]
    fn timeout_reason_codes() {
        let mut machine = StateMachine::new();
        let t = machine
            .transition(&TransitionRequest::new(
                "run-1",
                RunState::AwaitingApproval,
                RunEvent::Timeout,
            ))
            .unwrap();
        assert_eq!(t.reason_code, Some(ReasonCode::ApprovalTimeout));

        let t = machine
            .transition(&TransitionRequest::new(
                "run-2",
                RunState::ReportReady,
                RunEvent::Timeout,
            ))
            .unwrap();
        assert_eq!(t.reason_code, Some(ReasonCode::ConfirmTimeout));
    }

    #[test]
    fn error_tag_reaches_reason_code() {
        let mut machine = StateMachine::new();
        let t = machine
            .transition(
                &TransitionRequest::new("run-1", RunState::Executing, RunEvent::Error)
                    .with_error_tag("playwright"),
            )
            .unwrap();
        assert_eq!(t.reason_code, Some(ReasonCode::PlaywrightError));
    }

    #[test]
    fn explicit_reason_wins_over_derived() {
        let mut machine = StateMachine::new();
        let t = machine
            .transition(
                &TransitionRequest::new("run-1", RunState::Executing, RunEvent::Error)
                    .with_reason("browser crashed on step 3"),
            )
            .unwrap();
        let entry = t.log_entry.unwrap();
        assert_eq!(entry.reason.as_deref(), Some("browser crashed on step 3"));
    }
}
