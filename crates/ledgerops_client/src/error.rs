//! Classified failures of the operation client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signer::SignerError;

/// Every way an operation can fail, with the classification kept intact so
/// callers can pick a retry policy without string matching.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// The descriptor is not a well-formed origination or invocation.
    /// Raised before any network traffic.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The signer capability could not produce a signature.
    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    /// The node refused the broadcast (malformed operation, insufficient
    /// balance, counter in the past, ...).
    #[error("Submission rejected by node: {0}")]
    Submission(String),

    /// The operation was included but the target contract aborted.
    /// `reason` is the contract-supplied message, unmodified.
    #[error("{reason}")]
    Rejection { reason: String },

    /// The requested confirmation depth was not reached in time. The outcome
    /// of the operation is unknown.
    #[error("Operation {op_hash} not confirmed after {elapsed:?} (last depth seen: {last_depth:?})")]
    Timeout {
        op_hash: String,
        elapsed: Duration,
        last_depth: Option<u32>,
    },

    /// No contract is deployed at the queried address.
    #[error("No contract found at {0}")]
    NotFound(String),

    /// Node unreachable, server error or an unreadable response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON encoding or decoding failed locally.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Broad failure class of an [`OpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The caller built something the client refuses to send.
    Invalid,
    /// Local signing capability failed.
    Signer,
    /// Node refused the operation before inclusion.
    Submission,
    /// Contract logic aborted the included operation.
    Application,
    /// Outcome not known yet.
    Pending,
    /// Address has no contract.
    NotFound,
    /// Network or node failure.
    Transport,
}

/// What a caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Resending the same operation yields the same result.
    Never,
    /// Fix the cause (balance, arguments, key) before resubmitting.
    AfterFix,
    /// Retry the same request with backoff.
    Backoff,
    /// Keep polling the existing hash; do not resubmit.
    Repoll,
}

impl OpError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidOperation(_) | Self::Serialization(_) => ErrorClass::Invalid,
            Self::Signer(_) => ErrorClass::Signer,
            Self::Submission(_) => ErrorClass::Submission,
            Self::Rejection { .. } => ErrorClass::Application,
            Self::Timeout { .. } => ErrorClass::Pending,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Transport(_) => ErrorClass::Transport,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.class() {
            ErrorClass::Application | ErrorClass::NotFound => RetryPolicy::Never,
            ErrorClass::Invalid | ErrorClass::Signer | ErrorClass::Submission => {
                RetryPolicy::AfterFix
            }
            ErrorClass::Pending => RetryPolicy::Repoll,
            ErrorClass::Transport => RetryPolicy::Backoff,
        }
    }

    /// Contract-supplied abort message, if this is an application rejection.
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            Self::Rejection { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_displays_reason_verbatim() {
        let err = OpError::Rejection {
            reason: "Access denied".into(),
        };
        assert_eq!(err.to_string(), "Access denied");
        assert_eq!(err.rejection_reason(), Some("Access denied"));
    }

    #[test]
    fn classes_map_to_distinct_policies() {
        let rejection = OpError::Rejection {
            reason: "FA2_NOT_OPERATOR".into(),
        };
        let transport = OpError::Transport("connection refused".into());
        let timeout = OpError::Timeout {
            op_hash: "oo1".into(),
            elapsed: Duration::from_secs(10),
            last_depth: Some(0),
        };

        assert_eq!(rejection.retry_policy(), RetryPolicy::Never);
        assert_eq!(transport.retry_policy(), RetryPolicy::Backoff);
        assert_eq!(timeout.retry_policy(), RetryPolicy::Repoll);
        assert!(timeout.is_timeout());
        assert_eq!(
            OpError::Submission("balance too low".into()).retry_policy(),
            RetryPolicy::AfterFix
        );
        assert_eq!(OpError::NotFound("KT1".into()).class(), ErrorClass::NotFound);
    }

    #[test]
    fn signer_errors_convert() {
        let err: OpError = SignerError::Unavailable("locked".into()).into();
        assert_eq!(err.class(), ErrorClass::Signer);
        assert!(err.rejection_reason().is_none());
    }
}
