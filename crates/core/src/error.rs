use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("{backend} unavailable: {details}")]
    StoreUnavailable { backend: String, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Machine-readable code carried in the `error` field of protocol
    /// error responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::EmbeddingUnavailable(_) => "embedding_unavailable",
            EngineError::StoreUnavailable { .. } => "store_unavailable",
            EngineError::BackendResponse { .. } => "store_error",
            EngineError::DimensionMismatch(_) => "dimension_mismatch",
            EngineError::Regex(_) => "internal_error",
            EngineError::Serialization(_) => "internal_error",
            EngineError::Url(_) => "validation_error",
            EngineError::Io(_) => "io_error",
        }
    }

    /// Whether retrying the identical request can succeed. Validation and
    /// not-found failures never clear on retry; backend outages can.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::EmbeddingUnavailable(_) | EngineError::StoreUnavailable { .. }
        )
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
