use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArcadeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("Hint service error: {0}")]
    HintService(String),
}

impl ArcadeError {
    /// True for errors raised by the SQL engine itself (bad statement text,
    /// unknown tables/columns, unsupported constructs). The validation flow
    /// recovers these into an execution-error outcome; everything else is
    /// fatal for the request.
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            ArcadeError::Parse(_)
                | ArcadeError::NotSupported(_)
                | ArcadeError::NotFound(_)
                | ArcadeError::Invalid(_)
        )
    }
}
