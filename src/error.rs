use thiserror::Error;

/// Failures talking to the X API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("X API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// The API answered 2xx but the body was missing an expected field.
    #[error("malformed X API response: {0}")]
    Protocol(String),
}

/// Entry-scoped failure while publishing one scheduled tweet. These are
/// recovered into the entry's recorded result and never abort sibling
/// entries.
#[derive(Debug, Error)]
pub enum PostError {
    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// History persistence failure. Fatal to the run that hits it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("history write conflict")]
    Conflict,
}

/// Run-scoped failure: nothing was (or will be) durably recorded for this
/// run beyond what the message says. Entry-level publish failures are not
/// run errors; they land in the per-entry results instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("schedule error: {0}")]
    Schedule(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
