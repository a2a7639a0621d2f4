use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Marker not found in document. Marker: {marker}")]
    NotFound { marker: String },

    #[error("Malformed embedded literal at byte {offset}: {reason} (near `{context}`)")]
    MalformedLiteral {
        offset: usize,
        context: String,
        reason: String,
    },

    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    InvalidSelector(String),

    #[error("Transport error fetching {url} (status: {status:?}): {reason}")]
    Transport {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// Reserved: the normalizer degrades bad fields to `None` instead of raising this.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No game identities could be resolved from any source.")]
    EmptyUniverse,

    #[error("Invalid configuration {key}={value:?}: {reason}")]
    Config {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Transport {
            url: value.url().map(|u| u.to_string()).unwrap_or_default(),
            status: value.status().map(|s| s.as_u16()),
            reason: value.to_string(),
        }
    }
}

impl Error {
    /// Errors that are local to one document and leave the rest of a run untouched.
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::MalformedLiteral { .. } | Error::Transport { .. }
        )
    }
}
