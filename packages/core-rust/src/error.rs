//! Closed error taxonomy shared by every layer of the runtime.
//!
//! [`BusError`] distinguishes who has to act on a failure: the caller
//! ([`ErrorKind::IllegalInput`]), the operator ([`ErrorKind::Configuration`]),
//! a higher retry layer ([`ErrorKind::Infrastructure`],
//! [`ErrorKind::Communication`]), the business caller
//! ([`ErrorKind::ProviderFault`]) or the developer
//! ([`ErrorKind::ProtocolViolation`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exchange::Fault;

/// Boxed error used as the optional cause of a [`BusError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used across the workspace.
pub type BusResult<T> = Result<T, BusError>;

/// Discriminant of [`BusError`], cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    IllegalInput,
    Configuration,
    Infrastructure,
    Communication,
    ProviderFault,
    ProtocolViolation,
    RetriesExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IllegalInput => "illegal-input",
            Self::Configuration => "configuration",
            Self::Infrastructure => "infrastructure",
            Self::Communication => "communication",
            Self::ProviderFault => "provider-fault",
            Self::ProtocolViolation => "protocol-violation",
            Self::RetriesExhausted => "retries-exhausted",
        };
        f.write_str(s)
    }
}

/// Marker cause attached to store errors raised for an absent call context.
///
/// Backends report absence with different kinds (a missing file is an
/// operator problem, a missing directory entry is a caller problem), so the
/// marker lets callers detect "not found" independently of the kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no call context stored under key `{key}`")]
pub struct ContextNotFound {
    pub key: String,
}

/// Errors raised by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Bad or missing key, unparseable identifier. Never retried.
    #[error("illegal input: {message}")]
    IllegalInput {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// Missing resource or unresolvable type. Needs operator action.
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// I/O, transport or permission failure.
    #[error("infrastructure failure: {message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// Stale or broken connection.
    #[error("communication failure: {message}")]
    Communication {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The remote side answered with a business fault.
    #[error("provider fault: {0}")]
    ProviderFault(Box<Fault>),
    /// Programming error upstream (missing context, missing scope, double completion).
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },
    /// Every attempt of a resilient invocation failed.
    #[error("invocation failed after {} attempt(s){}", failures.len(), last_cause(failures))]
    RetriesExhausted { failures: Vec<BusError> },
}

fn last_cause(failures: &[BusError]) -> String {
    failures
        .last()
        .map(|e| format!(", last cause: {e}"))
        .unwrap_or_default()
}

impl BusError {
    pub fn illegal_input(message: impl Into<String>) -> Self {
        Self::IllegalInput {
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure {
            message: message.into(),
            source: None,
        }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Builds an error of `kind` flagged with a [`ContextNotFound`] cause.
    ///
    /// Kinds without a cause slot fall back to `IllegalInput`.
    #[must_use]
    pub fn not_found(kind: ErrorKind, key: &str) -> Self {
        let cause = ContextNotFound {
            key: key.to_string(),
        };
        let message = cause.to_string();
        let source: Option<BoxError> = Some(Box::new(cause));
        match kind {
            ErrorKind::Configuration => Self::Configuration { message, source },
            ErrorKind::Infrastructure => Self::Infrastructure { message, source },
            ErrorKind::Communication => Self::Communication { message, source },
            _ => Self::IllegalInput { message, source },
        }
    }

    /// Attaches a cause to the error. No-op for variants without a cause slot.
    #[must_use]
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::IllegalInput { source, .. }
            | Self::Configuration { source, .. }
            | Self::Infrastructure { source, .. }
            | Self::Communication { source, .. } => *source = Some(cause.into()),
            Self::ProviderFault(_) | Self::ProtocolViolation { .. } | Self::RetriesExhausted { .. } => {}
        }
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalInput { .. } => ErrorKind::IllegalInput,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Infrastructure { .. } => ErrorKind::Infrastructure,
            Self::Communication { .. } => ErrorKind::Communication,
            Self::ProviderFault(_) => ErrorKind::ProviderFault,
            Self::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    /// Whether a higher layer may retry the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Infrastructure | ErrorKind::Communication
        )
    }

    /// Whether the error reports an absent call context.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        let source = match self {
            Self::IllegalInput { source, .. }
            | Self::Configuration { source, .. }
            | Self::Infrastructure { source, .. }
            | Self::Communication { source, .. } => source.as_ref(),
            _ => None,
        };
        source.is_some_and(|s| s.downcast_ref::<ContextNotFound>().is_some())
    }

    /// The business fault carried by a `ProviderFault`.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::ProviderFault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<Fault> for BusError {
    fn from(fault: Fault) -> Self {
        Self::ProviderFault(Box::new(fault))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
