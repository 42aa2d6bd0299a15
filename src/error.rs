#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unsupported input format: {0}")]
    UnsupportedInput(String),
    #[error("input not found: {0}")]
    InputNotFound(String),
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("clustering error: {0}")]
    Clustering(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl LlmError {
    /// Heuristic for providers that reject `response_format: json_object`.
    /// Matches the error body substrings and the bare 400 status the
    /// OpenRouter-compatible servers return in that case.
    pub fn is_json_mode_rejection(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("response_format") || text.contains("json_object") || text.contains("400")
    }

    /// Transient errors are worth retrying: network failures, 429s, 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Request(_) => true,
            LlmError::ApiError { status, .. } => *status == 429 || *status >= 500,
            LlmError::Parse(_) => false,
        }
    }
}
