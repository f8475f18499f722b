//! Runtime error taxonomy for limiter operations.

use crate::application::ports::StoreError;
use std::fmt;

/// Error returned by limiter operations at runtime.
///
/// Construction-time problems are [`ConfigError`](crate::ConfigError);
/// everything that can go wrong on a live call lands here. The limiter
/// performs no internal retries: the only failure it recovers from
/// locally is the store's unknown-script signal, handled inside the
/// script cache and never surfaced.
#[derive(Debug)]
pub enum LimiterError {
    /// Every submitted identifier was empty after trimming.
    NoValidKeys,
    /// A script name unknown to the cache was requested. Programmer error.
    UnknownScriptName(String),
    /// The store failed; the underlying error is carried unchanged.
    Store(StoreError),
    /// The script answered with a code outside `{0, 1, 2}`. Fatal.
    UnexpectedScriptResult(i64),
}

impl fmt::Display for LimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterError::NoValidKeys => {
                write!(f, "no valid identifiers remain after trimming")
            }
            LimiterError::UnknownScriptName(name) => {
                write!(f, "unknown script name: {}", name)
            }
            LimiterError::Store(e) => write!(f, "store operation failed: {}", e),
            LimiterError::UnexpectedScriptResult(code) => {
                write!(f, "script returned unexpected result {}", code)
            }
        }
    }
}

impl std::error::Error for LimiterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LimiterError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LimiterError {
    fn from(e: StoreError) -> Self {
        LimiterError::Store(e)
    }
}
