//! Agent collaborator seam.
//!
//! The pipeline delegates all actual work — document parsing, browser test
//! execution, cross-review — to external agents behind [`PipelineAgents`].
//! [`SubprocessAgents`] is the production implementation, driving the agent
//! CLI through `qaflow-agent`; tests substitute mocks.

use async_trait::async_trait;
use qaflow_agent::{AgentError, AgentTask, InvokeOptions};
use qaflow_core::error::{QaflowError, Result};
use qaflow_core::model::{ExecutionResults, Requirement, ReviewResults, TestCase};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Requests / outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    MissingCoverage,
    WrongExpectation,
    TooShallow,
    Other,
}

/// Human feedback attached to a regeneration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationFeedback {
    pub category: FeedbackCategory,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseRequest {
    pub run_id: String,
    pub prd_text: String,
    /// Present on regeneration: the rejected artifacts plus the reviewer's
    /// feedback, so the agent can do better than a cold re-parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<RegenerationFeedback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_requirements: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prior_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutput {
    pub requirements: Vec<Requirement>,
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub run_id: String,
    pub workspace: PathBuf,
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub run_id: String,
    pub results: ExecutionResults,
}

// ---------------------------------------------------------------------------
// PipelineAgents trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PipelineAgents: Send + Sync {
    /// PRD in, structured requirements + generated test cases out.
    async fn parse_document(&self, req: ParseRequest) -> Result<ParseOutput>;

    /// Execute the generated cases, returning assertion verdicts with
    /// evidence paths relative to the run workspace.
    async fn execute_tests(&self, req: ExecuteRequest) -> Result<ExecutionResults>;

    /// Cross-review execution results, returning per-assertion verdicts and
    /// any unresolved conflicts.
    async fn review_results(&self, req: ReviewRequest) -> Result<ReviewResults>;
}

// ---------------------------------------------------------------------------
// SubprocessAgents
// ---------------------------------------------------------------------------

/// Drives the external agent CLI. Each capability is one subprocess
/// invocation returning schema-shaped JSON that is deserialized here; shape
/// mismatches surface as `Agent` errors rather than panics.
pub struct SubprocessAgents {
    opts: InvokeOptions,
}

impl SubprocessAgents {
    pub fn new(opts: InvokeOptions) -> Self {
        Self { opts }
    }

    fn opts_for(&self, workspace: Option<&PathBuf>) -> InvokeOptions {
        let mut opts = self.opts.clone();
        if let Some(ws) = workspace {
            opts.cwd = Some(ws.clone());
        }
        opts
    }
}

/// Carry the agent's error tag through to reason-code classification.
fn agent_err(e: AgentError) -> QaflowError {
    match e {
        AgentError::Failed { message, tag } => QaflowError::Agent { message, tag },
        other => QaflowError::Agent {
            message: other.to_string(),
            tag: None,
        },
    }
}

fn decode<T: serde::de::DeserializeOwned>(task: AgentTask, data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| QaflowError::Agent {
        message: format!("{task} returned malformed payload: {e}"),
        tag: None,
    })
}

#[async_trait]
impl PipelineAgents for SubprocessAgents {
    async fn parse_document(&self, req: ParseRequest) -> Result<ParseOutput> {
        let payload = serde_json::to_value(&req)?;
        let data = qaflow_agent::invoke_and_wait(AgentTask::ParseDocument, payload, self.opts_for(None))
            .await
            .map_err(agent_err)?;
        decode(AgentTask::ParseDocument, data)
    }

    async fn execute_tests(&self, req: ExecuteRequest) -> Result<ExecutionResults> {
        let opts = self.opts_for(Some(&req.workspace));
        let payload = serde_json::to_value(&req)?;
        let data = qaflow_agent::invoke_and_wait(AgentTask::ExecuteTests, payload, opts)
            .await
            .map_err(agent_err)?;
        decode(AgentTask::ExecuteTests, data)
    }

    async fn review_results(&self, req: ReviewRequest) -> Result<ReviewResults> {
        let payload = serde_json::to_value(&req)?;
        let data =
            qaflow_agent::invoke_and_wait(AgentTask::ReviewResults, payload, self.opts_for(None))
                .await
                .map_err(agent_err)?;
        decode(AgentTask::ReviewResults, data)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_failure_keeps_tag() {
        let err = agent_err(AgentError::Failed {
            message: "page crashed".into(),
            tag: Some("playwright".into()),
        });
        match err {
            QaflowError::Agent { message, tag } => {
                assert_eq!(message, "page crashed");
                assert_eq!(tag.as_deref(), Some("playwright"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn process_failure_has_no_tag() {
        let err = agent_err(AgentError::Process("exited with code 1".into()));
        match err {
            QaflowError::Agent { tag, .. } => assert!(tag.is_none()),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn malformed_payload_is_an_agent_error() {
        let result: Result<ParseOutput> =
            decode(AgentTask::ParseDocument, serde_json::json!({"nope": 1}));
        assert!(matches!(result, Err(QaflowError::Agent { .. })));
    }

    #[test]
    fn parse_request_omits_empty_feedback() {
        let req = ParseRequest {
            run_id: "run-1".into(),
            prd_text: "# PRD".into(),
            feedback: None,
            prior_requirements: Vec::new(),
            prior_cases: Vec::new(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("feedback"));
        assert!(!json.contains("prior_requirements"));
    }
}
