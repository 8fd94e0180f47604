//! Network seams. Every endpoint the orchestration layer talks to is reached
//! through one of these traits, so the pipeline never depends on a concrete
//! wire protocol.

use crate::error::TransportError;
use crate::proposal::SignedProposal;
use crate::types::{
    BroadcastResponse, Endpoint, EventFilter, LedgerEvent, ProposalResponse, TransactionEnvelope,
};
use async_trait::async_trait;
use std::sync::Arc;

/// A peer able to simulate and endorse proposals (including lifecycle ones).
#[async_trait]
pub trait EndorsingPeer: Send + Sync {
    async fn process_proposal(
        &self,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError>;
}

/// One node of the ordering service.
#[async_trait]
pub trait OrderingService: Send + Sync {
    async fn broadcast(
        &self,
        envelope: &TransactionEnvelope,
    ) -> Result<BroadcastResponse, TransportError>;
}

/// A peer's event endpoint.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventConnection>, TransportError>;
}

/// Live event stream owned by exactly one subscription.
#[async_trait]
pub trait EventConnection: Send {
    async fn register(&mut self, filter: &EventFilter) -> Result<(), TransportError>;

    /// Next delivered event; `None` once the stream is closed by the remote.
    async fn next_event(&mut self) -> Option<Result<LedgerEvent, TransportError>>;

    async fn disconnect(&mut self);
}

/// Resolves endpoints into live service handles.
pub trait Transport: Send + Sync {
    fn peer(&self, endpoint: &Endpoint) -> Result<Arc<dyn EndorsingPeer>, TransportError>;

    fn orderer(&self, endpoint: &Endpoint) -> Result<Arc<dyn OrderingService>, TransportError>;

    fn event_source(&self, endpoint: &Endpoint) -> Result<Arc<dyn EventSource>, TransportError>;
}
