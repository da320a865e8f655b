use thiserror::Error;

/// Unified error type for the clustering pipeline and its collaborators.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Errored while handling a file. {0}")]
    Io(#[from] std::io::Error),
    #[error("Error serializing json. {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Error communicating with the AI. {0}")]
    AIClient(#[from] async_openai::error::OpenAIError),
    #[error("Not enough usable embeddings: found {found}, need at least {required}")]
    InsufficientData { found: usize, required: usize },
    #[error("Embedding for {id} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        found: usize,
    },
    #[error("Collaborator call failed. {0}")]
    Collaborator(String),
    #[error("Collaborator call timed out. {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error("Runtime error. {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
    #[error("Error parsing the duration string. {0}")]
    DurationParse(#[from] humantime::DurationError),
    #[error("{0}")]
    Dir(#[from] semantic_clusters_dirs::DirError),
    #[error("{0}")]
    Other(String),
}

/// Convenience alias for results that bubble `AppError`.
pub type AppResult<T> = Result<T, AppError>;
