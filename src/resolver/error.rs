use thiserror::Error;

/// Errors raised while resolving a link into remote nodes.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The URL does not describe a file or folder link.
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// The link was removed, expired, or never existed.
    #[error("Link unavailable: {0}")]
    Unavailable(String),

    /// The folder key was rejected or access is otherwise denied.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The remote answered with an error that is worth retrying.
    #[error("Remote temporarily unavailable: {0}")]
    Transient(String),

    /// Any other remote error.
    #[error("Remote error: {message} (code: {code})")]
    Remote { code: String, message: String },

    /// The configured gateway address cannot carry request paths.
    #[error("Invalid gateway URL: {0}")]
    Gateway(String),

    /// The node listing did not form a tree.
    #[error("Malformed node tree: {0}")]
    MalformedTree(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ResolveError {
    /// Whether the same request may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::InvalidLink(_)
            | Self::Unavailable(_)
            | Self::AccessDenied(_)
            | Self::Remote { .. }
            | Self::Gateway(_)
            | Self::MalformedTree(_) => false,
        }
    }
}
