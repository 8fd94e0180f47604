//! Scripted transport doubles with call counters for unit tests.

use crate::error::TransportError;
use crate::identity::{ChannelContext, ChannelHandle, ClientHandle, Identity, IdentityContext};
use crate::proposal::SignedProposal;
use crate::transport::{EndorsingPeer, EventConnection, EventSource, OrderingService, Transport};
use crate::types::{
    BlockEvent, BroadcastResponse, BroadcastStatus, ChaincodeEvent, Endpoint, EventFilter,
    LedgerEvent, ProposalResponse, TransactionEnvelope, TransactionValidation, ValidationCode,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum PeerScript {
    Respond {
        status: u16,
        payload: Vec<u8>,
        results: Vec<u8>,
    },
    Fail(TransportError),
    Hang,
}

impl PeerScript {
    pub fn ok(payload: &str, results: &str) -> Self {
        Self::Respond {
            status: 200,
            payload: payload.as_bytes().to_vec(),
            results: results.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventStep {
    Commit {
        after: Duration,
        block_number: u64,
        code: ValidationCode,
    },
    Chaincode {
        after: Duration,
        payload: Vec<u8>,
    },
    Unrelated {
        after: Duration,
    },
    Close {
        after: Duration,
    },
}

#[derive(Debug, Clone)]
pub enum EventScript {
    Steps(Vec<EventStep>),
    RegisterFails,
    ConnectFails,
    ConnectHangs,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub proposals: AtomicUsize,
    pub broadcasts: AtomicUsize,
    pub event_connects: AtomicUsize,
    pub registrations: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    peers: HashMap<String, PeerScript>,
    orderers: HashMap<String, Result<BroadcastStatus, TransportError>>,
    events: HashMap<String, EventScript>,
    pub counters: Arc<Counters>,
}

impl ScriptedTransport {
    pub fn with_peer(mut self, url: &str, script: PeerScript) -> Self {
        self.peers.insert(url.to_string(), script);
        self
    }

    pub fn with_orderer(
        mut self,
        url: &str,
        outcome: Result<BroadcastStatus, TransportError>,
    ) -> Self {
        self.orderers.insert(url.to_string(), outcome);
        self
    }

    pub fn with_events(mut self, url: &str, script: EventScript) -> Self {
        self.events.insert(url.to_string(), script);
        self
    }

    pub fn into_context(self, orderers: &[&str]) -> (IdentityContext, Arc<Counters>) {
        let counters = self.counters.clone();
        let identity = Identity::from_hex_key("Org1MSP", &hex::encode([5u8; 32]), "admin-cert")
            .unwrap_or_else(|_| Identity::generate("Org1MSP", "admin-cert"));
        let ctx = IdentityContext {
            identity: Arc::new(identity),
            context: ChannelContext {
                client: ClientHandle::new(Arc::new(self)),
                channel: ChannelHandle {
                    channel_id: "mychannel".to_string(),
                    orderers: orderers.iter().map(|url| Endpoint::new(*url)).collect(),
                },
            },
        };
        (ctx, counters)
    }
}

struct ScriptedPeer {
    url: String,
    script: PeerScript,
    counters: Arc<Counters>,
}

#[async_trait]
impl EndorsingPeer for ScriptedPeer {
    async fn process_proposal(
        &self,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.counters.proposals.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            PeerScript::Respond {
                status,
                payload,
                results,
            } => Ok(ProposalResponse {
                endorser: self.url.clone(),
                status: *status,
                message: String::new(),
                payload: payload.clone(),
                results: results.clone(),
                signature: proposal.tx_id().as_bytes().to_vec(),
            }),
            PeerScript::Fail(err) => Err(err.clone()),
            PeerScript::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Closed(self.url.clone()))
            }
        }
    }
}

struct ScriptedOrderer {
    outcome: Result<BroadcastStatus, TransportError>,
    counters: Arc<Counters>,
}

#[async_trait]
impl OrderingService for ScriptedOrderer {
    async fn broadcast(
        &self,
        _envelope: &TransactionEnvelope,
    ) -> Result<BroadcastResponse, TransportError> {
        self.counters.broadcasts.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone().map(|status| BroadcastResponse {
            status,
            info: String::new(),
        })
    }
}

struct ScriptedEventSource {
    url: String,
    script: EventScript,
    counters: Arc<Counters>,
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn connect(&self) -> Result<Box<dyn EventConnection>, TransportError> {
        self.counters.event_connects.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            EventScript::ConnectFails => Err(TransportError::Unreachable(self.url.clone())),
            EventScript::ConnectHangs => {
                std::future::pending::<()>().await;
                Err(TransportError::Closed(self.url.clone()))
            }
            EventScript::Steps(steps) => Ok(Box::new(ScriptedConnection {
                steps: steps.iter().cloned().collect(),
                filter: None,
                reject_register: false,
                counters: self.counters.clone(),
            })),
            EventScript::RegisterFails => Ok(Box::new(ScriptedConnection {
                steps: VecDeque::new(),
                filter: None,
                reject_register: true,
                counters: self.counters.clone(),
            })),
        }
    }
}

struct ScriptedConnection {
    steps: VecDeque<EventStep>,
    filter: Option<EventFilter>,
    reject_register: bool,
    counters: Arc<Counters>,
}

impl ScriptedConnection {
    fn tx_id(&self) -> String {
        match &self.filter {
            Some(EventFilter::Transaction { tx_id }) => tx_id.clone(),
            _ => "unrelated-tx".to_string(),
        }
    }

    fn chaincode_coordinates(&self) -> (String, String) {
        match &self.filter {
            Some(EventFilter::ChaincodeEvent {
                chaincode_id,
                event_name,
            }) => (chaincode_id.clone(), event_name.clone()),
            _ => ("dfn".to_string(), "project_created".to_string()),
        }
    }
}

#[async_trait]
impl EventConnection for ScriptedConnection {
    async fn register(&mut self, filter: &EventFilter) -> Result<(), TransportError> {
        self.counters.registrations.fetch_add(1, Ordering::SeqCst);
        if self.reject_register {
            return Err(TransportError::Protocol(format!(
                "filter '{}' rejected",
                filter.describe()
            )));
        }
        self.filter = Some(filter.clone());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<LedgerEvent, TransportError>> {
        let Some(step) = self.steps.pop_front() else {
            std::future::pending::<()>().await;
            return None;
        };
        match step {
            EventStep::Commit {
                after,
                block_number,
                code,
            } => {
                tokio::time::sleep(after).await;
                Some(Ok(LedgerEvent::Block(BlockEvent {
                    block_number,
                    transactions: vec![TransactionValidation {
                        tx_id: self.tx_id(),
                        code,
                    }],
                })))
            }
            EventStep::Chaincode { after, payload } => {
                tokio::time::sleep(after).await;
                let (chaincode_id, event_name) = self.chaincode_coordinates();
                Some(Ok(LedgerEvent::Chaincode(ChaincodeEvent {
                    chaincode_id,
                    event_name,
                    tx_id: self.tx_id(),
                    block_number: 1,
                    payload,
                })))
            }
            EventStep::Unrelated { after } => {
                tokio::time::sleep(after).await;
                Some(Ok(LedgerEvent::Block(BlockEvent {
                    block_number: 0,
                    transactions: vec![TransactionValidation {
                        tx_id: "someone-else".to_string(),
                        code: ValidationCode::Valid,
                    }],
                })))
            }
            EventStep::Close { after } => {
                tokio::time::sleep(after).await;
                None
            }
        }
    }

    async fn disconnect(&mut self) {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for ScriptedTransport {
    fn peer(&self, endpoint: &Endpoint) -> Result<Arc<dyn EndorsingPeer>, TransportError> {
        let script = self
            .peers
            .get(&endpoint.url)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(endpoint.url.clone()))?;
        Ok(Arc::new(ScriptedPeer {
            url: endpoint.url.clone(),
            script,
            counters: self.counters.clone(),
        }))
    }

    fn orderer(&self, endpoint: &Endpoint) -> Result<Arc<dyn OrderingService>, TransportError> {
        let outcome = self
            .orderers
            .get(&endpoint.url)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(endpoint.url.clone()))?;
        Ok(Arc::new(ScriptedOrderer {
            outcome,
            counters: self.counters.clone(),
        }))
    }

    fn event_source(&self, endpoint: &Endpoint) -> Result<Arc<dyn EventSource>, TransportError> {
        let script = self
            .events
            .get(&endpoint.url)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(endpoint.url.clone()))?;
        Ok(Arc::new(ScriptedEventSource {
            url: endpoint.url.clone(),
            script,
            counters: self.counters.clone(),
        }))
    }
}
