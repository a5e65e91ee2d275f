//! Error taxonomy for the router core (see spec §7).
//!
//! Library code returns [`RouterError`] so callers can match on the kind of
//! failure; `main` and the HTTP layer collapse everything into `anyhow`.

use thiserror::Error;

/// Errors raised by the routing core, session state machines, and protocol
/// parsing. Each variant corresponds to a row in the error taxonomy table.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The upstream or a client closed its TCP connection.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// A line could not be parsed as a signal or key=value pair, or exceeded
    /// the maximum line length.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// FRDP AUTH failed or was required but never sent.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A config file value could not be parsed into a valid rule.
    #[error("configuration error: {0}")]
    Config(String),

    /// An invariant the router core depends on was violated at runtime.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl RouterError {
    /// True for the subset of errors that should terminate the process
    /// when `stop_minded` is set (programmer-error / invariant rows of §7).
    pub fn is_stop_minded(&self) -> bool {
        matches!(self, RouterError::Invariant(_))
    }
}
