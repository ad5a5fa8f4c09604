use crate::quality::QualityMetric;
use crate::types::{ReasonCode, RunEvent, RunState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DecisionLogEntry
// ---------------------------------------------------------------------------

/// One audited transition. Created exactly once per successful non-no-op
/// transition; entries are appended, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub from_state: RunState,
    pub to_state: RunState,
    pub event: RunEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// The run record. Owned by the pipeline runner while executing; persisted
/// through the run store between steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub project_id: String,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    pub prd_path: String,
    #[serde(default)]
    pub tested_routes: Vec<String>,
    pub workspace_path: String,
    #[serde(default)]
    pub decision_log: Vec<DecisionLogEntry>,
    /// Cached gate snapshot; the calculator recomputes on demand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_metrics: Vec<QualityMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        prd_path: impl Into<String>,
        workspace_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            state: RunState::Created,
            reason_code: None,
            prd_path: prd_path.into(),
            tested_routes: Vec::new(),
            workspace_path: workspace_path.into(),
            decision_log: Vec::new(),
            quality_metrics: Vec::new(),
            report_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply a settled transition: set the new state, append the log entry,
    /// and stamp `completed_at` on entry into `completed`.
    pub fn apply_transition(
        &mut self,
        new_state: RunState,
        entry: DecisionLogEntry,
        reason_code: Option<ReasonCode>,
    ) {
        self.state = new_state;
        if reason_code.is_some() {
            self.reason_code = reason_code;
        }
        self.updated_at = entry.timestamp;
        if new_state == RunState::Completed && self.completed_at.is_none() {
            self.completed_at = Some(entry.timestamp);
        }
        self.decision_log.push(entry);
    }

    /// Number of regenerations already spent, counted from `REJECTED`
    /// entries in the decision log.
    pub fn regeneration_attempts(&self) -> u32 {
        self.decision_log
            .iter()
            .filter(|e| e.event == RunEvent::Rejected)
            .count() as u32
    }

    /// The most recent `n` transitions, newest last, for operator display.
    pub fn recent_transitions(&self, n: usize) -> &[DecisionLogEntry] {
        let len = self.decision_log.len();
        &self.decision_log[len.saturating_sub(n)..]
    }
}

// ---------------------------------------------------------------------------
// Run id generation
// ---------------------------------------------------------------------------

pub fn generate_run_id() -> String {
    format!("run-{}", uuid::Uuid::new_v4())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(from: RunState, to: RunState, event: RunEvent) -> DecisionLogEntry {
        DecisionLogEntry {
            timestamp: Utc::now(),
            from_state: from,
            to_state: to,
            event,
            reason: None,
            metadata: None,
        }
    }

    #[test]
    fn new_run_starts_created() {
        let run = Run::new("run-1", "proj", "docs/prd.md", "/tmp/ws");
        assert_eq!(run.state, RunState::Created);
        assert!(run.decision_log.is_empty());
        assert!(run.completed_at.is_none());
    }

    #[test]
    fn apply_transition_appends_log() {
        let mut run = Run::new("run-1", "proj", "docs/prd.md", "/tmp/ws");
        run.apply_transition(
            RunState::Parsing,
            entry(RunState::Created, RunState::Parsing, RunEvent::StartParsing),
            None,
        );
        assert_eq!(run.state, RunState::Parsing);
        assert_eq!(run.decision_log.len(), 1);
    }

    #[test]
    fn completed_at_set_once() {
        let mut run = Run::new("run-1", "proj", "docs/prd.md", "/tmp/ws");
        run.state = RunState::ReportReady;
        run.apply_transition(
            RunState::Completed,
            entry(RunState::ReportReady, RunState::Completed, RunEvent::Confirmed),
            None,
        );
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn regeneration_attempts_counts_rejections() {
        let mut run = Run::new("run-1", "proj", "docs/prd.md", "/tmp/ws");
        assert_eq!(run.regeneration_attempts(), 0);
        for _ in 0..2 {
            run.apply_transition(
                RunState::Generating,
                entry(
                    RunState::AwaitingApproval,
                    RunState::Generating,
                    RunEvent::Rejected,
                ),
                None,
            );
        }
        assert_eq!(run.regeneration_attempts(), 2);
    }

    #[test]
    fn recent_transitions_tail() {
        let mut run = Run::new("run-1", "proj", "docs/prd.md", "/tmp/ws");
        for _ in 0..5 {
            run.apply_transition(
                RunState::Parsing,
                entry(RunState::Created, RunState::Parsing, RunEvent::StartParsing),
                None,
            );
        }
        assert_eq!(run.recent_transitions(3).len(), 3);
        assert_eq!(run.recent_transitions(10).len(), 5);
    }

    #[test]
    fn run_yaml_roundtrip() {
        let run = Run::new("run-1", "proj", "docs/prd.md", "/tmp/ws");
        let yaml = serde_yaml::to_string(&run).unwrap();
        let parsed: Run = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.id, "run-1");
        assert_eq!(parsed.state, RunState::Created);
    }
}
