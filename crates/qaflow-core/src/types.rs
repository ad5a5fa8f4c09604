use serde::{Deserialize, Serialize};
use std::fmt;

/// Hours an external watchdog allows a run to sit in `awaiting_approval`
/// before firing `TIMEOUT`.
pub const APPROVAL_TIMEOUT_HOURS: i64 = 24;

/// Hours allowed in `report_ready` before `TIMEOUT`.
pub const CONFIRM_TIMEOUT_HOURS: i64 = 48;

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Parsing,
    Generating,
    AwaitingApproval,
    Executing,
    CodexReviewing,
    ReportReady,
    Completed,
    Failed,
}

impl RunState {
    pub fn all() -> &'static [RunState] {
        &[
            RunState::Created,
            RunState::Parsing,
            RunState::Generating,
            RunState::AwaitingApproval,
            RunState::Executing,
            RunState::CodexReviewing,
            RunState::ReportReady,
            RunState::Completed,
            RunState::Failed,
        ]
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Parsing => "parsing",
            RunState::Generating => "generating",
            RunState::AwaitingApproval => "awaiting_approval",
            RunState::Executing => "executing",
            RunState::CodexReviewing => "codex_reviewing",
            RunState::ReportReady => "report_ready",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = crate::error::QaflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunState::Created),
            "parsing" => Ok(RunState::Parsing),
            "generating" => Ok(RunState::Generating),
            "awaiting_approval" => Ok(RunState::AwaitingApproval),
            "executing" => Ok(RunState::Executing),
            "codex_reviewing" => Ok(RunState::CodexReviewing),
            "report_ready" => Ok(RunState::ReportReady),
            "completed" => Ok(RunState::Completed),
            "failed" => Ok(RunState::Failed),
            _ => Err(crate::error::QaflowError::InvalidState(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RunEvent
// ---------------------------------------------------------------------------

/// Lifecycle events delivered to the state machine. Serialized in the
/// SCREAMING_SNAKE_CASE form used on the external wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEvent {
    StartParsing,
    ParsingComplete,
    GenerationComplete,
    Approved,
    Rejected,
    ExecutionComplete,
    ReviewComplete,
    Confirmed,
    Retest,
    Timeout,
    Error,
}

impl RunEvent {
    pub fn all() -> &'static [RunEvent] {
        &[
            RunEvent::StartParsing,
            RunEvent::ParsingComplete,
            RunEvent::GenerationComplete,
            RunEvent::Approved,
            RunEvent::Rejected,
            RunEvent::ExecutionComplete,
            RunEvent::ReviewComplete,
            RunEvent::Confirmed,
            RunEvent::Retest,
            RunEvent::Timeout,
            RunEvent::Error,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunEvent::StartParsing => "START_PARSING",
            RunEvent::ParsingComplete => "PARSING_COMPLETE",
            RunEvent::GenerationComplete => "GENERATION_COMPLETE",
            RunEvent::Approved => "APPROVED",
            RunEvent::Rejected => "REJECTED",
            RunEvent::ExecutionComplete => "EXECUTION_COMPLETE",
            RunEvent::ReviewComplete => "REVIEW_COMPLETE",
            RunEvent::Confirmed => "CONFIRMED",
            RunEvent::Retest => "RETEST",
            RunEvent::Timeout => "TIMEOUT",
            RunEvent::Error => "ERROR",
        }
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunEvent {
    type Err = crate::error::QaflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START_PARSING" => Ok(RunEvent::StartParsing),
            "PARSING_COMPLETE" => Ok(RunEvent::ParsingComplete),
            "GENERATION_COMPLETE" => Ok(RunEvent::GenerationComplete),
            "APPROVED" => Ok(RunEvent::Approved),
            "REJECTED" => Ok(RunEvent::Rejected),
            "EXECUTION_COMPLETE" => Ok(RunEvent::ExecutionComplete),
            "REVIEW_COMPLETE" => Ok(RunEvent::ReviewComplete),
            "CONFIRMED" => Ok(RunEvent::Confirmed),
            "RETEST" => Ok(RunEvent::Retest),
            "TIMEOUT" => Ok(RunEvent::Timeout),
            "ERROR" => Ok(RunEvent::Error),
            _ => Err(crate::error::QaflowError::InvalidEvent(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ReasonCode
// ---------------------------------------------------------------------------

/// Every terminal failure carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    RetryExhausted,
    AgentTimeout,
    ApprovalTimeout,
    ConfirmTimeout,
    VerdictConflict,
    PlaywrightError,
    InternalError,
}

impl ReasonCode {
    /// Reason for a `TIMEOUT` event, derived from the state it fired in.
    pub fn for_timeout(from: RunState) -> ReasonCode {
        match from {
            RunState::AwaitingApproval => ReasonCode::ApprovalTimeout,
            RunState::ReportReady => ReasonCode::ConfirmTimeout,
            _ => ReasonCode::AgentTimeout,
        }
    }

    /// Reason for an `ERROR` event, derived from the collaborator's
    /// error-type tag. Absent or unrecognized tags map to `internal_error`.
    pub fn from_error_tag(tag: Option<&str>) -> ReasonCode {
        match tag {
            Some("playwright") => ReasonCode::PlaywrightError,
            Some("verdict_conflict") => ReasonCode::VerdictConflict,
            Some("retry_exhausted") => ReasonCode::RetryExhausted,
            _ => ReasonCode::InternalError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::RetryExhausted => "retry_exhausted",
            ReasonCode::AgentTimeout => "agent_timeout",
            ReasonCode::ApprovalTimeout => "approval_timeout",
            ReasonCode::ConfirmTimeout => "confirm_timeout",
            ReasonCode::VerdictConflict => "verdict_conflict",
            ReasonCode::PlaywrightError => "playwright_error",
            ReasonCode::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineStep
// ---------------------------------------------------------------------------

/// Ordered steps of the run pipeline. Human checkpoints sit after
/// `prd_parsing` (approval) and after `quality_gate` (confirmation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Initialize,
    SourceIndexing,
    PrdParsing,
    TestExecution,
    CodexReview,
    CrossValidation,
    ReportGeneration,
    QualityGate,
}

impl PipelineStep {
    pub fn all() -> &'static [PipelineStep] {
        &[
            PipelineStep::Initialize,
            PipelineStep::SourceIndexing,
            PipelineStep::PrdParsing,
            PipelineStep::TestExecution,
            PipelineStep::CodexReview,
            PipelineStep::CrossValidation,
            PipelineStep::ReportGeneration,
            PipelineStep::QualityGate,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<PipelineStep> {
        PipelineStep::all().get(self.index() + 1).copied()
    }

    /// Fixed step → machine-state lookup.
    pub fn mapped_state(self) -> RunState {
        match self {
            PipelineStep::Initialize => RunState::Created,
            PipelineStep::SourceIndexing => RunState::Parsing,
            PipelineStep::PrdParsing => RunState::Generating,
            PipelineStep::TestExecution => RunState::Executing,
            PipelineStep::CodexReview | PipelineStep::CrossValidation => RunState::CodexReviewing,
            PipelineStep::ReportGeneration | PipelineStep::QualityGate => RunState::ReportReady,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Initialize => "initialize",
            PipelineStep::SourceIndexing => "source_indexing",
            PipelineStep::PrdParsing => "prd_parsing",
            PipelineStep::TestExecution => "test_execution",
            PipelineStep::CodexReview => "codex_review",
            PipelineStep::CrossValidation => "cross_validation",
            PipelineStep::ReportGeneration => "report_generation",
            PipelineStep::QualityGate => "quality_gate",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineStep {
    type Err = crate::error::QaflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" => Ok(PipelineStep::Initialize),
            "source_indexing" => Ok(PipelineStep::SourceIndexing),
            "prd_parsing" => Ok(PipelineStep::PrdParsing),
            "test_execution" => Ok(PipelineStep::TestExecution),
            "codex_review" => Ok(PipelineStep::CodexReview),
            "cross_validation" => Ok(PipelineStep::CrossValidation),
            "report_generation" => Ok(PipelineStep::ReportGeneration),
            "quality_gate" => Ok(PipelineStep::QualityGate),
            _ => Err(crate::error::QaflowError::InvalidStep(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
