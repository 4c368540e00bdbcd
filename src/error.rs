use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while scanning, looking up or downloading a manga.
///
/// Only [`FetchError::Config`] is fatal; everything else is caught at the
/// manga or cover boundary and turned into an outcome.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no catalog entry found for '{0}'")]
    NotFound(String),

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("request failed: {0}")]
    Permanent(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }

    /// Classifies an HTTP status that the caller did not expect.
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        let msg = format!("HTTP {} for {}", status.as_u16(), url);
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            FetchError::Transient(msg)
        } else {
            FetchError::Permanent(msg)
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let url = err.url().map(|u| u.as_str()).unwrap_or("<unknown>");
            return FetchError::from_status(status, url);
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            FetchError::Transient(err.to_string())
        } else {
            FetchError::Permanent(err.to_string())
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
