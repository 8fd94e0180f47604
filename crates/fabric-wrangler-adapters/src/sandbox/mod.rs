//! In-process network: endorsing peers running real chaincode simulation,
//! an ordering service that cuts one block per envelope, and per-peer event
//! hubs. Every component can be told to misbehave.

mod chaincode;
mod event_hub;
mod ledger;
mod orderer;
mod peer;

pub use chaincode::{
    Chaincode, ChaincodeError, ChaincodeStub, DeploymentChange, EventRecord, Project,
    ProjectRegistry, SimulationResults,
};
pub use event_hub::{EventHub, HubFault, SandboxEventSource};
pub use ledger::{Ledger, Version, VersionedValue, WorldState};
pub use orderer::{OrdererFault, SandboxOrderer};
pub use peer::{PeerFault, SandboxPeer};

use fabric_wrangler_core::{
    EndorsingPeer, Endpoint, EventSource, OrderingService, Transport, TransportError,
};
use peer::ChaincodeRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_BLOCK_INTERVAL: Duration = Duration::from_millis(200);

struct DeployedChaincode {
    id: String,
    /// `None` for chaincode that is known but neither installed nor
    /// instantiated.
    version: Option<String>,
    implementation: Arc<dyn Chaincode>,
}

pub struct SandboxNetworkBuilder {
    channel_id: String,
    peers: Vec<(String, String)>,
    orderers: Vec<String>,
    block_interval: Duration,
    chaincodes: Vec<DeployedChaincode>,
}

impl SandboxNetworkBuilder {
    /// Adds a peer with its event endpoint.
    pub fn peer(mut self, url: impl Into<String>, event_url: impl Into<String>) -> Self {
        self.peers.push((url.into(), event_url.into()));
        self
    }

    pub fn orderer(mut self, url: impl Into<String>) -> Self {
        self.orderers.push(url.into());
        self
    }

    pub fn block_interval(mut self, block_interval: Duration) -> Self {
        self.block_interval = block_interval;
        self
    }

    /// Installs the chaincode on every peer and records it as instantiated.
    pub fn chaincode(
        mut self,
        id: impl Into<String>,
        version: impl Into<String>,
        implementation: Arc<dyn Chaincode>,
    ) -> Self {
        self.chaincodes.push(DeployedChaincode {
            id: id.into(),
            version: Some(version.into()),
            implementation,
        });
        self
    }

    /// Makes the chaincode available for install without installing or
    /// instantiating it anywhere.
    pub fn available_chaincode(
        mut self,
        id: impl Into<String>,
        implementation: Arc<dyn Chaincode>,
    ) -> Self {
        self.chaincodes.push(DeployedChaincode {
            id: id.into(),
            version: None,
            implementation,
        });
        self
    }

    pub fn build(self) -> Arc<SandboxNetwork> {
        let mut ledger = Ledger::default();
        let mut registry = ChaincodeRegistry::new();
        for chaincode in &self.chaincodes {
            if let Some(version) = &chaincode.version {
                ledger.deploy(&chaincode.id, version);
            }
            registry.insert(chaincode.id.clone(), chaincode.implementation.clone());
        }
        let ledger = Arc::new(Mutex::new(ledger));
        let registry = Arc::new(registry);

        let peers: Vec<Arc<SandboxPeer>> = self
            .peers
            .iter()
            .map(|(url, _)| {
                let peer = SandboxPeer::new(url, ledger.clone(), registry.clone());
                for chaincode in &self.chaincodes {
                    if let Some(version) = &chaincode.version {
                        peer.mark_installed(&chaincode.id, version);
                    }
                }
                Arc::new(peer)
            })
            .collect();
        let hubs: Arc<Vec<Arc<EventHub>>> = Arc::new(
            self.peers
                .iter()
                .map(|(_, event_url)| Arc::new(EventHub::new(event_url)))
                .collect(),
        );
        let broadcasts = Arc::new(AtomicUsize::new(0));
        let orderers = self
            .orderers
            .iter()
            .map(|url| {
                Arc::new(SandboxOrderer::new(
                    url,
                    self.block_interval,
                    ledger.clone(),
                    hubs.clone(),
                    broadcasts.clone(),
                ))
            })
            .collect();

        info!(
            channel_id = %self.channel_id,
            peers = peers.len(),
            chaincodes = self.chaincodes.len(),
            "sandbox network started"
        );
        Arc::new(SandboxNetwork {
            channel_id: self.channel_id,
            peers,
            hubs,
            orderers,
            ledger,
            broadcasts,
        })
    }
}

/// Simulated single-channel network implementing [`Transport`].
pub struct SandboxNetwork {
    channel_id: String,
    peers: Vec<Arc<SandboxPeer>>,
    hubs: Arc<Vec<Arc<EventHub>>>,
    orderers: Vec<Arc<SandboxOrderer>>,
    ledger: Arc<Mutex<Ledger>>,
    broadcasts: Arc<AtomicUsize>,
}

impl SandboxNetwork {
    pub fn builder(channel_id: impl Into<String>) -> SandboxNetworkBuilder {
        SandboxNetworkBuilder {
            channel_id: channel_id.into(),
            peers: Vec::new(),
            orderers: Vec::new(),
            block_interval: DEFAULT_BLOCK_INTERVAL,
            chaincodes: Vec::new(),
        }
    }

    /// `peers` peers of one organization, one orderer and the project
    /// registry deployed as `dfn` at `v0`.
    pub fn standard(channel_id: impl Into<String>, peers: usize) -> SandboxNetworkBuilder {
        let builder = (0..peers).fold(Self::builder(channel_id), |builder, i| {
            builder.peer(
                format!("grpc://peer{i}.org1.example.com:7051"),
                format!("grpc://peer{i}.org1.example.com:7053"),
            )
        });
        builder
            .orderer("grpc://orderer.example.com:7050")
            .chaincode("dfn", "v0", Arc::new(ProjectRegistry))
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn peer_endpoints(&self) -> Vec<Endpoint> {
        self.peers.iter().map(|p| Endpoint::new(p.url())).collect()
    }

    pub fn event_endpoints(&self) -> Vec<Endpoint> {
        self.hubs.iter().map(|h| Endpoint::new(h.url())).collect()
    }

    pub fn orderer_endpoints(&self) -> Vec<Endpoint> {
        self.orderers.iter().map(|o| Endpoint::new(o.url())).collect()
    }

    pub fn sandbox_peer(&self, url: &str) -> Option<&Arc<SandboxPeer>> {
        self.peers.iter().find(|p| p.url() == url)
    }

    pub fn event_hub(&self, url: &str) -> Option<&Arc<EventHub>> {
        self.hubs.iter().find(|h| h.url() == url)
    }

    pub fn sandbox_orderer(&self, url: &str) -> Option<&Arc<SandboxOrderer>> {
        self.orderers.iter().find(|o| o.url() == url)
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }

    pub fn ledger_height(&self) -> u64 {
        self.lock_ledger().height()
    }

    pub fn deployed_version(&self, chaincode_id: &str) -> Option<String> {
        self.lock_ledger()
            .deployed_version(chaincode_id)
            .map(str::to_string)
    }

    /// Committed value of a chaincode key.
    pub fn state(&self, chaincode_id: &str, key: &str) -> Option<Vec<u8>> {
        self.lock_ledger()
            .state()
            .get(&format!("{}/{}", chaincode_id, key))
            .map(|entry| entry.value.clone())
    }

    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for SandboxNetwork {
    fn peer(&self, endpoint: &Endpoint) -> Result<Arc<dyn EndorsingPeer>, TransportError> {
        self.sandbox_peer(&endpoint.url)
            .map(|peer| peer.clone() as Arc<dyn EndorsingPeer>)
            .ok_or_else(|| TransportError::Unreachable(endpoint.url.clone()))
    }

    fn orderer(&self, endpoint: &Endpoint) -> Result<Arc<dyn OrderingService>, TransportError> {
        self.sandbox_orderer(&endpoint.url)
            .map(|orderer| orderer.clone() as Arc<dyn OrderingService>)
            .ok_or_else(|| TransportError::Unreachable(endpoint.url.clone()))
    }

    fn event_source(&self, endpoint: &Endpoint) -> Result<Arc<dyn EventSource>, TransportError> {
        self.event_hub(&endpoint.url)
            .map(|hub| Arc::new(SandboxEventSource::new(hub.clone())) as Arc<dyn EventSource>)
            .ok_or_else(|| TransportError::Unreachable(endpoint.url.clone()))
    }
}
