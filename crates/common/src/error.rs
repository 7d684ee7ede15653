use thiserror::Error;

/// Error taxonomy for all remote-call paths.
///
/// Classification happens exactly once, at the exchange-client boundary.
/// Everything downstream (retry wrapper, worker state machine) branches on
/// the variant, never on message contents.
#[derive(Debug, Error)]
pub enum Error {
    /// Network hiccup, rate limit, temporary exchange error. Safe to retry
    /// with backoff.
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// Bad credentials, unknown/unsupported instrument, corrupted order
    /// state. Never retried; terminates the affected worker only.
    #[error("fatal exchange error: {0}")]
    Fatal(String),

    /// Retries exhausted — no actionable market data this tick. Always
    /// non-fatal; the worker skips the tick and sleeps.
    #[error("no actionable data this tick (retries exhausted)")]
    DataUnavailable,

    /// Shutdown signal observed during a sleep inside a remote call.
    #[error("shutdown requested")]
    Shutdown,

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
