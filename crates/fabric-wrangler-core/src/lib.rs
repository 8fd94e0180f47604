//! Client-side orchestration for permissioned ledger chaincode calls.
//!
//! A state-changing call is driven as propose -> endorse (parallel fan-out,
//! joined) -> order -> confirm (event wait bounded by the block delay).
//! Queries stop after endorsement.

#![deny(unsafe_code)]

pub mod commit;
pub mod endorsement;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod options;
pub mod ordering;
pub mod proposal;
pub mod transport;
pub mod types;
pub mod wrangler;

#[cfg(test)]
pub(crate) mod testing;

pub use commit::{
    CommitConfirmer, Confirmation, EventSubscription, PendingConfirmation, SubscriptionState,
};
pub use endorsement::{EndorsementCollector, EndorsementSet, PeerOutcome};
pub use error::{TransportError, WranglerError};
pub use identity::{
    AdminCertEnroller, ChannelContext, ChannelHandle, ClientHandle, Creator, Enroller,
    EnrollmentOptions, Identity, IdentityContext,
};
pub use lifecycle::LifecycleManager;
pub use options::{
    ChaincodeEventOptions, ChaincodeOptions, EndorsementPolicy, InstallOptions, WranglerConfig,
};
pub use ordering::OrderingSubmitter;
pub use proposal::{
    DeploymentSpec, Proposal, ProposalAction, ProposalBuilder, SignedProposal,
    DEFAULT_INIT_FUNCTION, LIFECYCLE_CHAINCODE,
};
pub use transport::{EndorsingPeer, EventConnection, EventSource, OrderingService, Transport};
pub use types::{
    BlockEvent, BroadcastResponse, BroadcastStatus, ChaincodeEvent, Endorsement, Endpoint,
    EventFilter, EventWatchResult, InstallReport, InvocationResult, InvocationStatus, LedgerEvent,
    OrderingAck, PeerFailure, PeerPayload, ProposalResponse, QueryResult, TlsOptions,
    TransactionEnvelope, TransactionValidation, TxId, ValidationCode,
};
pub use wrangler::{ChaincodeEventWatch, FabricWrangler};
