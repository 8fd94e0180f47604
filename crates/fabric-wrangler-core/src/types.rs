use crate::error::WranglerError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TxId = String;

/// TLS material for one endpoint. Loading it from disk is the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    pub pem: Option<String>,
    pub ssl_target_name_override: Option<String>,
    pub default_authority: Option<String>,
}

/// Addressed network endpoint (peer, orderer or event source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(default)]
    pub tls: TlsOptions,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: TlsOptions::default(),
        }
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn is_secure(&self) -> bool {
        self.url.starts_with("grpcs://")
    }

    pub fn validate(&self) -> Result<(), WranglerError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(WranglerError::Configuration(
                "endpoint url must not be empty".to_string(),
            ));
        }
        if !url.starts_with("grpc://") && !url.starts_with("grpcs://") {
            return Err(WranglerError::Configuration(format!(
                "endpoint '{}' must use grpc:// or grpcs://",
                url
            )));
        }
        if self.is_secure() && self.tls.pem.as_deref().map_or(true, str::is_empty) {
            return Err(WranglerError::Configuration(format!(
                "endpoint '{}' uses TLS but no PEM was supplied",
                url
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Raw response of one endorsing peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub endorser: String,
    pub status: u16,
    pub message: String,
    pub payload: Vec<u8>,
    /// Serialized read/write set produced by simulation.
    pub results: Vec<u8>,
    pub signature: Vec<u8>,
}

impl ProposalResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// A successful, accepted endorsement keyed by the peer that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub peer: String,
    pub endorser: String,
    pub status: u16,
    pub payload: Vec<u8>,
    pub results: Vec<u8>,
    pub rwset_digest: String,
    pub signature: Vec<u8>,
}

impl Endorsement {
    pub fn from_response(peer: impl Into<String>, response: ProposalResponse) -> Self {
        let rwset_digest = blake3::hash(&response.results).to_hex().to_string();
        Self {
            peer: peer.into(),
            endorser: response.endorser,
            status: response.status,
            payload: response.payload,
            results: response.results,
            rwset_digest,
            signature: response.signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFailure {
    pub peer: String,
    pub error: String,
}

impl PeerFailure {
    pub fn new(peer: impl Into<String>, error: impl ToString) -> Self {
        Self {
            peer: peer.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPayload {
    pub peer: String,
    pub payload: Vec<u8>,
}

impl PeerPayload {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Endorsed transaction as shipped to the ordering service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx_id: TxId,
    pub channel_id: String,
    pub proposal: crate::proposal::SignedProposal,
    pub endorsements: Vec<Endorsement>,
    pub signature: Vec<u8>,
}

impl TransactionEnvelope {
    /// Digest covered by the envelope signature.
    pub fn signing_digest(
        proposal: &crate::proposal::SignedProposal,
        endorsements: &[Endorsement],
    ) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(proposal.proposal.tx_id.as_bytes());
        hasher.update(&proposal.signature);
        for endorsement in endorsements {
            hasher.update(endorsement.peer.as_bytes());
            hasher.update(endorsement.rwset_digest.as_bytes());
            hasher.update(&endorsement.signature);
        }
        *hasher.finalize().as_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastStatus {
    Success,
    BadRequest,
    Forbidden,
    NotFound,
    ServiceUnavailable,
    InternalServerError,
}

impl BroadcastStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::BadRequest => "BAD_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: BroadcastStatus,
    pub info: String,
}

/// Envelope accepted for sequencing. Says nothing about commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingAck {
    pub tx_id: TxId,
    pub orderer: String,
    pub status: BroadcastStatus,
}

/// Per-transaction verdict recorded by committing peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Valid,
    MvccReadConflict,
    PhantomReadConflict,
    EndorsementPolicyFailure,
    DuplicateTxid,
    BadPayload,
}

impl ValidationCode {
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::MvccReadConflict => "MVCC_READ_CONFLICT",
            Self::PhantomReadConflict => "PHANTOM_READ_CONFLICT",
            Self::EndorsementPolicyFailure => "ENDORSEMENT_POLICY_FAILURE",
            Self::DuplicateTxid => "DUPLICATE_TXID",
            Self::BadPayload => "BAD_PAYLOAD",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionValidation {
    pub tx_id: TxId,
    pub code: ValidationCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub block_number: u64,
    pub transactions: Vec<TransactionValidation>,
}

impl BlockEvent {
    pub fn validation_for(&self, tx_id: &str) -> Option<ValidationCode> {
        self.transactions
            .iter()
            .find(|tx| tx.tx_id == tx_id)
            .map(|tx| tx.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub event_name: String,
    pub tx_id: TxId,
    pub block_number: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    Block(BlockEvent),
    Chaincode(ChaincodeEvent),
}

/// What an event subscription is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventFilter {
    Transaction { tx_id: TxId },
    ChaincodeEvent {
        chaincode_id: String,
        event_name: String,
    },
}

impl EventFilter {
    pub fn transaction(tx_id: impl Into<TxId>) -> Self {
        Self::Transaction {
            tx_id: tx_id.into(),
        }
    }

    pub fn chaincode_event(chaincode_id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self::ChaincodeEvent {
            chaincode_id: chaincode_id.into(),
            event_name: event_name.into(),
        }
    }

    /// Whether the event is correlated with this filter at all.
    pub fn matches(&self, event: &LedgerEvent) -> bool {
        match (self, event) {
            (Self::Transaction { tx_id }, LedgerEvent::Block(block)) => {
                block.validation_for(tx_id).is_some()
            }
            (Self::Transaction { tx_id }, LedgerEvent::Chaincode(ev)) => &ev.tx_id == tx_id,
            (
                Self::ChaincodeEvent {
                    chaincode_id,
                    event_name,
                },
                LedgerEvent::Chaincode(ev),
            ) => &ev.chaincode_id == chaincode_id && &ev.event_name == event_name,
            (Self::ChaincodeEvent { .. }, LedgerEvent::Block(_)) => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Transaction { tx_id } => format!("tx:{}", tx_id),
            Self::ChaincodeEvent {
                chaincode_id,
                event_name,
            } => format!("event:{}/{}", chaincode_id, event_name),
        }
    }
}

/// Terminal outcome of a state-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationStatus {
    Committed { block_number: u64 },
    Rejected {
        block_number: u64,
        validation_code: ValidationCode,
    },
    /// No correlated event within the block delay; the ledger must be
    /// queried to learn the real outcome.
    TimedOut,
}

impl InvocationStatus {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub tx_id: TxId,
    pub status: InvocationStatus,
    pub peer_payloads: Vec<PeerPayload>,
    pub failed_peers: Vec<PeerFailure>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub tx_id: TxId,
    pub peer_payloads: Vec<PeerPayload>,
    pub failed_peers: Vec<PeerFailure>,
}

impl QueryResult {
    pub fn payloads(&self) -> Vec<&[u8]> {
        self.peer_payloads
            .iter()
            .map(|p| p.payload.as_slice())
            .collect()
    }
}

/// Aggregate of a per-peer install fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    pub chaincode_id: String,
    pub chaincode_version: String,
    pub installed: Vec<String>,
    pub failures: Vec<PeerFailure>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventWatchResult {
    Received(ChaincodeEvent),
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_validation() {
        assert!(Endpoint::new("grpc://localhost:7051").validate().is_ok());
        assert!(Endpoint::new("").validate().is_err());
        assert!(Endpoint::new("http://localhost:7051").validate().is_err());

        let secure = Endpoint::new("grpcs://peer0.org1:7051");
        assert!(matches!(
            secure.validate(),
            Err(WranglerError::Configuration(_))
        ));

        let secure = secure.with_tls(TlsOptions {
            pem: Some("-----BEGIN CERTIFICATE-----".to_string()),
            ssl_target_name_override: Some("peer0.org1.example.com".to_string()),
            default_authority: None,
        });
        assert!(secure.validate().is_ok());
    }

    #[test]
    fn endorsement_digest_follows_results() {
        let response = |results: &[u8]| ProposalResponse {
            endorser: "Org1MSP".to_string(),
            status: 200,
            message: String::new(),
            payload: b"ok".to_vec(),
            results: results.to_vec(),
            signature: vec![],
        };
        let a = Endorsement::from_response("peer0", response(b"rw-1"));
        let b = Endorsement::from_response("peer1", response(b"rw-1"));
        let c = Endorsement::from_response("peer2", response(b"rw-2"));
        assert_eq!(a.rwset_digest, b.rwset_digest);
        assert_ne!(a.rwset_digest, c.rwset_digest);
    }

    #[test]
    fn transaction_filter_correlates_block_and_chaincode_events() {
        let filter = EventFilter::transaction("tx-1");
        let block = LedgerEvent::Block(BlockEvent {
            block_number: 4,
            transactions: vec![TransactionValidation {
                tx_id: "tx-1".to_string(),
                code: ValidationCode::Valid,
            }],
        });
        let other = LedgerEvent::Block(BlockEvent {
            block_number: 5,
            transactions: vec![TransactionValidation {
                tx_id: "tx-2".to_string(),
                code: ValidationCode::Valid,
            }],
        });
        assert!(filter.matches(&block));
        assert!(!filter.matches(&other));

        let event = LedgerEvent::Chaincode(ChaincodeEvent {
            chaincode_id: "dfn".to_string(),
            event_name: "project_created".to_string(),
            tx_id: "tx-1".to_string(),
            block_number: 4,
            payload: vec![],
        });
        assert!(filter.matches(&event));
        assert!(EventFilter::chaincode_event("dfn", "project_created").matches(&event));
        assert!(!EventFilter::chaincode_event("dfn", "project_removed").matches(&event));
        assert!(!EventFilter::chaincode_event("dfn", "project_created").matches(&block));
    }

    #[test]
    fn proposal_response_status_ranges() {
        let mut response = ProposalResponse {
            endorser: String::new(),
            status: 200,
            message: String::new(),
            payload: vec![],
            results: vec![],
            signature: vec![],
        };
        assert!(response.is_success());
        response.status = 500;
        assert!(!response.is_success());
    }
}
