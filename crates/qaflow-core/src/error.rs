use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaflowError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("pipeline already running for run '{0}'")]
    AlreadyRunning(String),

    #[error("no transition from '{from}' on event '{event}'")]
    InvalidTransition { from: String, event: String },

    #[error("run is terminal in state '{state}': event '{event}' rejected")]
    TerminalState { state: String, event: String },

    #[error("cannot resume while run is in state '{0}' with an active instance")]
    ResumeBlocked(String),

    #[error("missing prerequisites for step '{step}': {}", missing.join(", "))]
    MissingPrerequisites { step: String, missing: Vec<String> },

    #[error("regeneration cap reached after {0} attempts: manual intervention required")]
    RegenerationExhausted(u32),

    #[error("invalid run state: {0}")]
    InvalidState(String),

    #[error("invalid run event: {0}")]
    InvalidEvent(String),

    #[error("invalid pipeline step: {0}")]
    InvalidStep(String),

    #[error("invalid run id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidRunId(String),

    #[error("PRD not found at {0}")]
    PrdNotFound(String),

    #[error("manifest not found at {0}")]
    ManifestNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("run store error: {0}")]
    Store(String),

    #[error("agent failure: {message}")]
    Agent {
        message: String,
        tag: Option<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QaflowError>;
