use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

// ─── AgentTask ────────────────────────────────────────────────────────────

/// The three capabilities the external agent exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentTask {
    /// PRD in, structured requirements + test cases out.
    ParseDocument,
    /// Test cases in, execution results (verdicts + evidence paths) out.
    ExecuteTests,
    /// Execution results in, review verdicts + conflicts out.
    ReviewResults,
}

impl AgentTask {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentTask::ParseDocument => "parse-document",
            AgentTask::ExecuteTests => "execute-tests",
            AgentTask::ReviewResults => "review-results",
        }
    }
}

impl fmt::Display for AgentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── InvokeOptions ────────────────────────────────────────────────────────

/// Options for one agent invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Agent executable; resolved on `PATH` when not given as a path.
    pub executable: Option<String>,
    /// Model override forwarded as `--model`.
    pub model: Option<String>,
    /// Working directory for the subprocess (usually the run workspace).
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub extra_args: Vec<String>,
}

pub const DEFAULT_EXECUTABLE: &str = "qa-agent";

// ─── AgentMessage ─────────────────────────────────────────────────────────

/// Every message the agent emits on stdout, one JSON object per line,
/// discriminated by the `"type"` field. Unknown types are skipped by the
/// process driver.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Progress(ProgressMessage),
    Artifact(ArtifactMessage),
    Result(AgentResult),
}

impl AgentMessage {
    /// Returns `Some(&AgentResult)` if this is the terminal result message.
    pub fn as_result(&self) -> Option<&AgentResult> {
        if let AgentMessage::Result(r) = self {
            Some(r)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgressMessage {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The agent wrote a file into the workspace.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactMessage {
    pub name: String,
    pub path: String,
}

/// Terminal message. On success `data` carries the schema-validated JSON
/// payload; on failure `error` is free text and `tag` (when present) names
/// the error type for reason-code classification.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl AgentResult {
    pub fn is_error(&self) -> bool {
        !self.ok
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("agent failed without detail")
    }

    pub fn error_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_wire_form_is_kebab() {
        let json = serde_json::to_string(&AgentTask::ParseDocument).unwrap();
        assert_eq!(json, "\"parse-document\"");
    }

    #[test]
    fn progress_message_parses() {
        let line = r#"{"type":"progress","stage":"navigating","detail":"/login"}"#;
        let msg: AgentMessage = serde_json::from_str(line).unwrap();
        match msg {
            AgentMessage::Progress(p) => {
                assert_eq!(p.stage, "navigating");
                assert_eq!(p.detail.as_deref(), Some("/login"));
            }
            other => panic!("expected progress, got {other:?}"),
        }
    }

    #[test]
    fn success_result_parses() {
        let line = r#"{"type":"result","ok":true,"data":{"requirements":[]}}"#;
        let msg: AgentMessage = serde_json::from_str(line).unwrap();
        let result = msg.as_result().unwrap();
        assert!(!result.is_error());
        assert!(result.data.is_some());
    }

    #[test]
    fn failure_result_carries_tag() {
        let line = r#"{"type":"result","ok":false,"error":"page crashed","tag":"playwright"}"#;
        let msg: AgentMessage = serde_json::from_str(line).unwrap();
        let result = msg.as_result().unwrap();
        assert!(result.is_error());
        assert_eq!(result.error_text(), "page crashed");
        assert_eq!(result.error_tag(), Some("playwright"));
    }

    #[test]
    fn failure_without_detail_has_fallback_text() {
        let result = AgentResult {
            ok: false,
            data: None,
            error: None,
            tag: None,
        };
        assert_eq!(result.error_text(), "agent failed without detail");
    }
}
