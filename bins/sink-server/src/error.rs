use sink_api::SinkError;
use sink_engine::StageError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("no {0} configured")]
    NoComponents(&'static str),

    #[error("client config '{0}' not found")]
    ClientNotFound(String),

    #[error("stage '{stage}': {source}")]
    Backend { stage: String, source: SinkError },

    #[error("{0}")]
    Stage(#[from] StageError),

    #[error("{0} stage(s) failed")]
    StagesFailed(usize),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
