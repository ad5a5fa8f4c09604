use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Requirement
// ---------------------------------------------------------------------------

/// One requirement parsed out of the PRD. `requirements.json` is an array
/// of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub title: String,
    pub priority: Priority,
    pub testable: bool,
    /// Route under test that this requirement belongs to.
    pub route: String,
}

// ---------------------------------------------------------------------------
// TestCase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStep {
    pub action: String,
    pub expected: String,
}

/// One generated test case. `test-cases.json` is an array of these; the
/// alternative `test-cases/` layout holds one array per requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub requirement_id: String,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

// ---------------------------------------------------------------------------
// Assertion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    UrlMatches,
    ElementVisible,
    TextContains,
    ApiStatus,
    /// Judgment-based check; excluded from deterministic pass-rate math.
    Soft,
}

impl AssertionKind {
    pub fn is_deterministic(self) -> bool {
        !matches!(self, AssertionKind::Soft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Error => "error",
        };
        f.write_str(s)
    }
}

/// One executed assertion with its settled verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub id: String,
    pub case_id: String,
    pub kind: AssertionKind,
    pub final_verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Execution history
// ---------------------------------------------------------------------------

/// One historical execution of one test case, the unit the flaky-rate
/// calculator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSample {
    pub run_id: String,
    pub case_id: String,
    pub verdict: Verdict,
}

// ---------------------------------------------------------------------------
// Step artifact documents
// ---------------------------------------------------------------------------

/// `execution-results.json` — output of the test-execution collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResults {
    pub run_id: String,
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub tested_routes: Vec<String>,
}

/// One reviewer verdict on an executed assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub assertion_id: String,
    pub agrees: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A disagreement between executor and reviewer on one assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictConflict {
    pub assertion_id: String,
    pub executor: Verdict,
    pub reviewer: Verdict,
}

/// `codex-review-results.json` — output of the review collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResults {
    pub reviewed_at: chrono::DateTime<chrono::Utc>,
    pub verdicts: Vec<ReviewVerdict>,
    #[serde(default)]
    pub conflicts: Vec<VerdictConflict>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
