//! Error types for aggregator calls.

use thiserror::Error;

/// Upstream response bodies are truncated to this many characters in errors.
const BODY_SNIPPET_CHARS: usize = 512;

/// Credential exchange failures. Fatal to a whole sync pass.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("aggregator client id/secret are not configured")]
    MissingCredentials,
    #[error("credential exchange rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("credential exchange request failed: {details}")]
    Transport { details: String },
    #[error("credential exchange returned an unexpected body: {details}")]
    Malformed { details: String },
}

/// Failures of a data call against the aggregator. Scoped to one item unless `Auth`.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("aggregator returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("aggregator request failed: {details}")]
    Transport { details: String, timed_out: bool },
    #[error("aggregator response could not be decoded: {details}")]
    Malformed { details: String },
}

impl FetchError {
    /// Upstream HTTP status, when the aggregator answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Auth(AuthError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        FetchError::Transport {
            timed_out: err.is_timeout(),
            details: err.to_string(),
        }
    }

    pub(crate) fn timed_out(limit: std::time::Duration) -> Self {
        FetchError::Transport {
            details: format!("gave up after {}s", limit.as_secs()),
            timed_out: true,
        }
    }
}

pub(crate) fn snippet(body: String) -> String {
    if body.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{truncated}...")
    } else {
        body
    }
}
