use std::error::Error;
use std::fmt;

/// Outcome classification for one routing attempt, driving both the retry
/// decision and the final aggregated status code.
#[derive(Debug, Clone)]
pub enum AttemptError {
    /// Upstream 429. Recoverable: the router moves on to the next key/model.
    Throttled {
        message: String,
        /// Absolute unix-ms reset time when the upstream told us one.
        reset_at_ms: Option<i64>,
    },
    /// invalid_grant or persistent 401; the key is sticky-failed.
    PermanentKeyFailure(String),
    /// The credential blob could not be parsed for this provider.
    InvalidKeyData(String),
    /// Other non-2xx or transport fault; counts toward the failure threshold.
    Upstream(String),
    /// A protocol conversion produced unrepresentable content.
    Adapter(String),
}

impl AttemptError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, AttemptError::Throttled { .. })
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Throttled { message, .. } => write!(f, "rate limited: {message}"),
            AttemptError::PermanentKeyFailure(msg) => write!(f, "permanent key failure: {msg}"),
            AttemptError::InvalidKeyData(msg) => write!(f, "invalid key data: {msg}"),
            AttemptError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            AttemptError::Adapter(msg) => write!(f, "adapter error: {msg}"),
        }
    }
}

impl Error for AttemptError {}
