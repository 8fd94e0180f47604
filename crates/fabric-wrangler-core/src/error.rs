use crate::types::{PeerFailure, TxId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure talking to a single network endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("endpoint '{0}' is unreachable")]
    Unreachable(String),

    #[error("request to '{endpoint}' timed out after {millis}ms")]
    Timeout { endpoint: String, millis: u64 },

    #[error("connection to '{0}' closed")]
    Closed(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Orchestration errors.
///
/// A rejected commit and a block-delay timeout are not listed here: both are
/// terminal outcomes of a well-formed conversation and are reported through
/// [`crate::types::InvocationStatus`].
#[derive(Debug, Error)]
pub enum WranglerError {
    #[error("Enrollment failed: {0}")]
    Enrollment(String),

    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Endorsement quorum not met: {received} of {required} required endorsements")]
    NoEndorsement {
        required: usize,
        received: usize,
        failures: Vec<PeerFailure>,
    },

    #[error(
        "Endorsement mismatch: {} peers returned differing read/write-set digests",
        .digests.len()
    )]
    EndorsementMismatch { digests: BTreeMap<String, String> },

    #[error("Ordering service rejected envelope with status {status}: {info}")]
    OrderingRejected { status: String, info: String },

    /// `tx_id` is set when the lost wait was for an already ordered
    /// transaction, whose outcome can still be learned from the ledger.
    #[error("Event connection to '{endpoint}' lost: {reason}")]
    ConnectionLost {
        endpoint: String,
        reason: String,
        tx_id: Option<TxId>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl WranglerError {
    pub fn stage_violation(expected: &str, actual: &str) -> Self {
        Self::InvariantViolation(format!(
            "stage order violation: expected '{}', got '{}'",
            expected, actual
        ))
    }

    pub fn connection_lost(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionLost {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
            tx_id: None,
        }
    }

    /// Tags a lost commit wait with the ordered transaction's id.
    pub fn with_tx_id(self, tx_id: impl Into<TxId>) -> Self {
        match self {
            Self::ConnectionLost {
                endpoint, reason, ..
            } => Self::ConnectionLost {
                endpoint,
                reason,
                tx_id: Some(tx_id.into()),
            },
            other => other,
        }
    }

    /// Per-peer failures carried by the error, if any.
    pub fn peer_failures(&self) -> &[PeerFailure] {
        match self {
            Self::NoEndorsement { failures, .. } => failures,
            _ => &[],
        }
    }
}
