//! Transport adapters for `fabric-wrangler-core`.
//!
//! The [`sandbox`] module provides a complete single-channel network that
//! runs in-process: endorsing peers simulate real chaincode against a shared
//! world state, the orderer cuts blocks and validates read sets, and event
//! hubs deliver block and chaincode events. Faults can be injected into each
//! component to exercise timeouts, failover and rejection paths.

#![deny(unsafe_code)]

pub mod sandbox;

pub use sandbox::{
    Chaincode, ChaincodeError, ChaincodeStub, EventHub, HubFault, OrdererFault, PeerFault,
    Project, ProjectRegistry, SandboxNetwork, SandboxNetworkBuilder, DEFAULT_BLOCK_INTERVAL,
};
