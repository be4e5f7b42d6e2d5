use std::time::Duration;

/// Crate-wide result type for upstream calls.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Typed upstream failures. Transport and API errors are always mapped to
/// one of these; a raw reqwest error never crosses the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The bot token was rejected or could not be resolved to a workspace.
    #[error("slack token is invalid or unauthorized: {detail}")]
    Unauthorized { detail: String },

    /// The channel name is already taken upstream. Not an error to the
    /// caller; drives the lock/resync branch of the create path.
    #[error("channel name is already taken upstream")]
    Conflict,

    /// Transient upstream failure (network error, non-2xx transport status,
    /// unexpected API error code).
    #[error("slack upstream request failed: {detail}")]
    Unavailable { detail: String },

    /// The upstream payload did not have the expected shape.
    #[error("unexpected slack payload: {detail}")]
    Protocol { detail: String },

    /// The rate-limit retry budget was exhausted.
    #[error("slack rate limit not cleared after {attempts} attempts (last delay {last_delay:?})")]
    RateLimited { attempts: u32, last_delay: Duration },
}

impl UpstreamError {
    #[must_use]
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }
}
