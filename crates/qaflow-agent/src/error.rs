use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse agent output line: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("agent binary not found: {0}")]
    MissingBinary(String),

    #[error("agent process error: {0}")]
    Process(String),

    #[error("agent reported failure: {message}")]
    Failed {
        message: String,
        /// Error-type tag carried through to reason-code classification.
        tag: Option<String>,
    },
}
