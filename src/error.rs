//! Error taxonomy of the acquisition pipeline

use thiserror::Error;

/// Low-level failure reported by an [`HttpTransport`](crate::traits::HttpTransport)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("blocked with 403 Forbidden fetching {url}")]
    Blocked { url: String },

    #[error("unexpected status {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("gave up on {url} after {attempts} attempts: {last}")]
    RetryExhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether the upstream rejected us, either directly or as the final failure of a retry run
    pub fn is_blocked(&self) -> bool {
        match self {
            Self::Blocked { .. } => true,
            Self::RetryExhausted { last, .. } => last.is_blocked(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error("no game name found on {url}")]
    MissingName { url: String },

    #[error("invalid {field} selector `{selector}`: {reason}")]
    InvalidSelector {
        field: &'static str,
        selector: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("conflicting write for game `{name}` of provider {provider_id}")]
    Conflict { name: String, provider_id: i64 },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl PersistenceError {
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}

/// Failure of a single detail URL inside a crawl
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl CrawlError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Fetch(err) if err.is_blocked())
    }
}
