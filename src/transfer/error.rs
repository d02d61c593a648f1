use thiserror::Error;

/// Typed transfer errors enabling retry classification.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("HTTP error {status} downloading {path}")]
    HttpStatus { status: u16, path: String },

    #[error("HTTP error downloading {path} after {bytes_written} bytes: {source}")]
    Http {
        source: reqwest::Error,
        path: String,
        bytes_written: u64,
    },

    #[error("Size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("No download URL for node {0}")]
    MissingUrl(String),

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),
}

impl TransferError {
    /// Whether this error is transient and worth retrying.
    ///
    /// A size mismatch usually means the connection was cut short.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Http { .. } | Self::SizeMismatch { .. } => true,
            Self::MissingUrl(_) | Self::Disk(_) => false,
        }
    }
}
