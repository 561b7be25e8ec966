use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// No frame could be read from the source. Halts the monitoring loop.
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Analysis timeout: {0}")]
    AnalysisTimeout(String),

    #[error("Analysis failure: {0}")]
    AnalysisFailure(String),

    /// Both the vision and the face collaborator failed for one run.
    #[error("Dual analysis failure: {0}")]
    DualAnalysisFailure(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The referenced event is no longer retrievable.
    #[error("Context expired: {0}")]
    ContextExpired(String),

    #[error("Conversation answer failure: {0}")]
    ConversationAnswerFailure(String),

    #[error("Pipeline busy: {0}")]
    PipelineBusy(String),

    #[error("Pipeline run aborted: {0}")]
    RunAborted(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Only capture loss stops the monitor; everything else is a failed run
    /// or a degraded result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Capture(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
