use sink_api::SinkError;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Backend connectivity could not be established. Fatal, not retried.
    #[error("stage '{stage}' init: {source}")]
    Init { stage: String, source: SinkError },

    #[error("stage '{stage}' already initialized")]
    AlreadyInitialized { stage: String },

    #[error("stage '{stage}' not initialized")]
    NotInitialized { stage: String },

    /// Record layout fault (body does not fit the configured shape).
    #[error("stage '{stage}' layout: {source}")]
    Layout { stage: String, source: SinkError },

    /// Write failure escalated by `WriteFailurePolicy::Escalate`.
    #[error("stage '{stage}' write: {source}")]
    Write { stage: String, source: SinkError },

    #[error("stage '{stage}' close: {source}")]
    Close { stage: String, source: SinkError },
}

impl StageError {
    pub fn stage(&self) -> &str {
        match self {
            StageError::Init { stage, .. }
            | StageError::AlreadyInitialized { stage }
            | StageError::NotInitialized { stage }
            | StageError::Layout { stage, .. }
            | StageError::Write { stage, .. }
            | StageError::Close { stage, .. } => stage,
        }
    }
}
