//! Error taxonomy for device interactions
//!
//! Every layer below the CLI returns [`Result`]. The CLI converts into
//! `anyhow::Error` at the boundary, logs and exits.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A mutating submit (or a diagnostics job) got an unexpected HTTP status.
    #[error("{operation} may have failed: unexpected code HTTP {status} returned")]
    Operation { operation: String, status: u16 },

    /// The device answered 200 but the body lacked something we need.
    #[error("{operation} failed: {message}")]
    Protocol { operation: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Connection-level failures, split so the CLI can tell "device unreachable"
/// apart from other client errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Cannot connect to host \"{host}\". Is network up and device on?")]
    Connect { host: String },

    #[error("Request to host \"{host}\" timed out. Is network up and device on?")]
    Timeout { host: String },

    #[error("HTTP client error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Cannot log in: unexpected code HTTP {0} returned")]
    ChallengeStatus(u16),

    #[error("Cannot log in: unexpected content type \"{0}\" returned (text/xml expected)")]
    ChallengeContentType(String),

    #[error("Cannot log in: no challenge found in response body")]
    MissingChallenge,

    #[error("Cannot log in: invalid login/password?")]
    BadCredentials,

    #[error("Cannot reconnect to device (HTTP {status} after re-login). Aborting")]
    SessionLost { status: u16 },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Cannot find node matching \"{0}\"")]
    NotFound(String),

    #[error("Node matching \"{selector}\" is a <{found}>, expected <{expected}>")]
    WrongNodeType {
        selector: String,
        expected: &'static str,
        found: String,
    },

    #[error("Invalid selector \"{selector}\": {message}")]
    InvalidSelector { selector: String, message: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cannot add NAT rule, invalid IP: {0}")]
    InvalidIp(String),

    #[error("Cannot add NAT rule, ranges do not match: {0}")]
    RangeMismatch(String),

    #[error("Cannot add NAT rule, external and target ports must both be single ports or both ranges: {0}")]
    PortKindMismatch(String),

    #[error("Cannot remove NAT rule, invalid ID: {0}")]
    InvalidRuleId(u32),

    #[error("Cannot remove NAT rule, no such ID: {0}")]
    UnknownRuleId(u32),
}

/// Log at error level, then hand the error back to be returned
pub(crate) fn logged(err: impl Into<Error>) -> Error {
    let err = err.into();
    tracing::error!("{}", err);
    err
}

impl Error {
    pub(crate) fn operation(operation: impl Into<String>, status: u16) -> Self {
        Self::Operation {
            operation: operation.into(),
            status,
        }
    }

    pub(crate) fn protocol(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True when the device could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Connect { .. } | TransportError::Timeout { .. })
        )
    }
}
