use reqwest::StatusCode;

/// Configuration errors raised while reading the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing TASKMATE_TOKEN")]
    MissingToken,

    #[error("Invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Errors from the rate-limit coordinator.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate-limit coordinator must be created inside a Tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Errors from TaskMate API calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} ({code}): {message}")]
    Status {
        code: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Stable error code for JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Http(_) => "upstream_error",
            ApiError::Status { code, .. } => *code,
            ApiError::Deserialize(_) => "server_error",
            ApiError::Url(_) => "bad_request",
        }
    }

    pub fn retriable(&self) -> bool {
        match self {
            ApiError::Http(_) => true,
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

/// Rejection reasons for a proof-of-completion upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("no files selected")]
    Empty,

    #[error("too many files: {count} (max {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error("{name}: file is empty")]
    EmptyFile { name: String },

    #[error("{name}: {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("total upload size {total} bytes exceeds the {max} byte limit")]
    TotalTooLarge { total: u64, max: u64 },

    #[error("{name}: extension not allowed")]
    ExtensionNotAllowed { name: String },

    #[error("{name}: MIME type {mime} not allowed")]
    MimeNotAllowed { name: String, mime: String },

    #[error("{name}: MIME type {mime} does not match the file extension")]
    MimeMismatch { name: String, mime: String },
}
