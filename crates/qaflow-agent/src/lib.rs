//! `qaflow-agent` — native driver for the external QA agent subprocess.
//!
//! The agent CLI does the actual work qaflow orchestrates: parsing a PRD
//! into requirements and test cases, executing browser test cases, and
//! cross-reviewing execution results. This crate speaks its
//! `--output-format jsonl` protocol as a first-class library so the runner
//! never shells out by hand.
//!
//! # Architecture
//!
//! ```text
//! InvokeOptions
//!     │
//!     ▼
//! AgentProcess      ← spawns `qa-agent run --task … --output-format jsonl`
//!     │                sends the request JSON on stdin, reads JSONL stdout
//!     ▼
//! InvocationStream  ← implements futures::Stream<Item = Result<AgentMessage>>
//!     │                background task + mpsc channel
//!     ▼
//! AgentMessage enum ← progress / artifact / result, fully typed
//! ```

pub mod error;
pub mod types;

pub(crate) mod process;
pub mod stream;

pub use error::AgentError;
pub use stream::InvocationStream;
pub use types::{
    AgentMessage, AgentResult, AgentTask, ArtifactMessage, InvokeOptions, ProgressMessage,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Invoke one agent task.
///
/// Returns an [`InvocationStream`] that yields [`AgentMessage`] values as
/// they arrive from the subprocess. The stream terminates after the first
/// `result` message or on process exit.
pub fn invoke(task: AgentTask, payload: serde_json::Value, opts: InvokeOptions) -> InvocationStream {
    InvocationStream::new(task, payload, opts)
}

/// Invoke one agent task and wait for its terminal result.
///
/// Progress and artifact messages are logged at debug level and discarded.
/// A stream that ends without a result message becomes a `Process` error; a
/// `result` with `ok = false` becomes [`AgentError::Failed`] carrying the
/// agent's error text and tag.
pub async fn invoke_and_wait(
    task: AgentTask,
    payload: serde_json::Value,
    opts: InvokeOptions,
) -> Result<serde_json::Value> {
    use futures::StreamExt;

    let mut stream = invoke(task, payload, opts);
    while let Some(msg) = stream.next().await {
        match msg? {
            AgentMessage::Progress(p) => {
                tracing::debug!(task = %task, stage = %p.stage, "agent progress");
            }
            AgentMessage::Artifact(a) => {
                tracing::debug!(task = %task, name = %a.name, path = %a.path, "agent artifact");
            }
            AgentMessage::Result(r) => {
                if r.is_error() {
                    return Err(AgentError::Failed {
                        message: r.error_text().to_string(),
                        tag: r.tag,
                    });
                }
                return Ok(r.data.unwrap_or(serde_json::Value::Null));
            }
        }
    }

    Err(AgentError::Process(
        "agent exited without a result message".into(),
    ))
}
