use super::chaincode::{Chaincode, ChaincodeStub, DeploymentChange, SimulationResults};
use super::ledger::Ledger;
use async_trait::async_trait;
use fabric_wrangler_core::{
    EndorsingPeer, ProposalAction, ProposalResponse, SignedProposal, TransportError,
    LIFECYCLE_CHAINCODE,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Injected endorsing-peer misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFault {
    Unreachable,
    /// Answers correctly after the delay.
    Slow(Duration),
    ErrorStatus { status: u16, message: String },
    /// Simulates correctly but returns a read/write set no other peer
    /// produces.
    Divergent,
}

pub(crate) type ChaincodeRegistry = HashMap<String, Arc<dyn Chaincode>>;

/// Simulated endorsing peer. All peers of a sandbox share one committed
/// ledger; installed packages are per peer.
pub struct SandboxPeer {
    url: String,
    ledger: Arc<Mutex<Ledger>>,
    chaincodes: Arc<ChaincodeRegistry>,
    installed: Mutex<BTreeSet<(String, String)>>,
    fault: Mutex<Option<PeerFault>>,
    proposals: AtomicUsize,
}

impl SandboxPeer {
    pub(crate) fn new(
        url: impl Into<String>,
        ledger: Arc<Mutex<Ledger>>,
        chaincodes: Arc<ChaincodeRegistry>,
    ) -> Self {
        Self {
            url: url.into(),
            ledger,
            chaincodes,
            installed: Mutex::new(BTreeSet::new()),
            fault: Mutex::new(None),
            proposals: AtomicUsize::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_fault(&self, fault: Option<PeerFault>) {
        *lock(&self.fault) = fault;
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.load(Ordering::SeqCst)
    }

    pub fn is_installed(&self, chaincode_id: &str, version: &str) -> bool {
        lock(&self.installed).contains(&(chaincode_id.to_string(), version.to_string()))
    }

    pub(crate) fn mark_installed(&self, chaincode_id: &str, version: &str) {
        lock(&self.installed).insert((chaincode_id.to_string(), version.to_string()));
    }

    fn respond(
        &self,
        proposal: &SignedProposal,
        outcome: Result<Simulated, String>,
    ) -> ProposalResponse {
        let (status, message, payload, results) = match outcome {
            Ok(simulated) => (200, String::new(), simulated.payload, simulated.results),
            Err(message) => (500, message, Vec::new(), Vec::new()),
        };
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.url.as_bytes());
        hasher.update(proposal.tx_id().as_bytes());
        hasher.update(&results);
        ProposalResponse {
            endorser: self.url.clone(),
            status,
            message,
            payload,
            results,
            signature: hasher.finalize().as_bytes().to_vec(),
        }
    }

    fn simulate(&self, signed: &SignedProposal) -> Result<Simulated, String> {
        let proposal = &signed.proposal;
        match proposal.action {
            ProposalAction::Install => self.install(signed),
            ProposalAction::Invoke | ProposalAction::Query => {
                let ledger = lock(&self.ledger);
                let deployed = ledger.deployed_version(&proposal.chaincode_id).ok_or_else(|| {
                    format!("chaincode {} is not instantiated", proposal.chaincode_id)
                })?;
                if deployed != proposal.chaincode_version {
                    return Err(format!(
                        "chaincode {} is at version {}, proposal targets {}",
                        proposal.chaincode_id, deployed, proposal.chaincode_version
                    ));
                }
                let chaincode =
                    self.chaincode(&proposal.chaincode_id, &proposal.chaincode_version)?;

                let mut stub = stub_for(&ledger, signed, &proposal.chaincode_id);
                let payload = chaincode.invoke(&mut stub).map_err(|e| e.to_string())?;
                Simulated::new(payload, stub.into_results())
            }
            ProposalAction::Instantiate | ProposalAction::Upgrade => {
                let ledger = lock(&self.ledger);
                match (proposal.action, ledger.deployed_version(&proposal.chaincode_id)) {
                    (ProposalAction::Instantiate, Some(version)) => {
                        return Err(format!(
                            "chaincode {} is already instantiated at version {}",
                            proposal.chaincode_id, version
                        ));
                    }
                    (ProposalAction::Upgrade, None) => {
                        return Err(format!(
                            "chaincode {} is not instantiated, cannot upgrade",
                            proposal.chaincode_id
                        ));
                    }
                    (ProposalAction::Upgrade, Some(version))
                        if version == proposal.chaincode_version =>
                    {
                        return Err(format!(
                            "chaincode {} is already at version {}",
                            proposal.chaincode_id, version
                        ));
                    }
                    _ => {}
                }
                let chaincode =
                    self.chaincode(&proposal.chaincode_id, &proposal.chaincode_version)?;

                let mut stub = stub_for(&ledger, signed, &proposal.chaincode_id);
                chaincode.init(&mut stub).map_err(|e| e.to_string())?;
                let mut results = stub.into_results();

                // The lifecycle record is read and written like any other key
                // so concurrent deployments of one chaincode conflict.
                let record = format!("{}/{}", LIFECYCLE_CHAINCODE, proposal.chaincode_id);
                results
                    .reads
                    .insert(record.clone(), ledger.state().get(&record).map(|e| e.version));
                results
                    .writes
                    .insert(record, Some(proposal.chaincode_version.clone().into_bytes()));
                results.deployment = Some(DeploymentChange {
                    chaincode_id: proposal.chaincode_id.clone(),
                    version: proposal.chaincode_version.clone(),
                });

                let payload = serde_json::json!({
                    "chaincode_id": proposal.chaincode_id,
                    "version": proposal.chaincode_version,
                })
                .to_string()
                .into_bytes();
                Simulated::new(payload, results)
            }
        }
    }

    fn install(&self, signed: &SignedProposal) -> Result<Simulated, String> {
        let proposal = &signed.proposal;
        let package_empty = proposal
            .deployment
            .as_ref()
            .map_or(true, |d| d.package.is_empty());
        if package_empty {
            return Err("install proposal carries no chaincode package".to_string());
        }
        if !self.chaincodes.contains_key(&proposal.chaincode_id) {
            return Err(format!(
                "no chaincode implementation named {} in this network",
                proposal.chaincode_id
            ));
        }
        let key = (proposal.chaincode_id.clone(), proposal.chaincode_version.clone());
        if !lock(&self.installed).insert(key) {
            return Err(format!(
                "chaincode {}:{} already installed",
                proposal.chaincode_id, proposal.chaincode_version
            ));
        }
        Ok(Simulated {
            payload: b"installed".to_vec(),
            results: Vec::new(),
        })
    }

    fn chaincode(&self, chaincode_id: &str, version: &str) -> Result<Arc<dyn Chaincode>, String> {
        if !self.is_installed(chaincode_id, version) {
            return Err(format!(
                "chaincode {}:{} is not installed on {}",
                chaincode_id, version, self.url
            ));
        }
        self.chaincodes
            .get(chaincode_id)
            .cloned()
            .ok_or_else(|| format!("no chaincode implementation named {}", chaincode_id))
    }
}

struct Simulated {
    payload: Vec<u8>,
    results: Vec<u8>,
}

impl Simulated {
    fn new(payload: Vec<u8>, results: SimulationResults) -> Result<Self, String> {
        let results = results.to_bytes().map_err(|e| e.to_string())?;
        Ok(Self { payload, results })
    }
}

fn stub_for<'a>(
    ledger: &'a Ledger,
    signed: &'a SignedProposal,
    namespace: &str,
) -> ChaincodeStub<'a> {
    let proposal = &signed.proposal;
    ChaincodeStub::new(
        ledger.state(),
        namespace,
        &proposal.tx_id,
        &proposal.creator.msp_id,
        proposal.timestamp,
        &proposal.function,
        &proposal.args,
        &proposal.transient_map,
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl EndorsingPeer for SandboxPeer {
    async fn process_proposal(
        &self,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, TransportError> {
        self.proposals.fetch_add(1, Ordering::SeqCst);
        let fault = lock(&self.fault).clone();
        match &fault {
            Some(PeerFault::Unreachable) => {
                return Err(TransportError::Unreachable(self.url.clone()));
            }
            Some(PeerFault::Slow(delay)) => tokio::time::sleep(*delay).await,
            Some(PeerFault::ErrorStatus { status, message }) => {
                return Ok(ProposalResponse {
                    endorser: self.url.clone(),
                    status: *status,
                    message: message.clone(),
                    payload: Vec::new(),
                    results: Vec::new(),
                    signature: Vec::new(),
                });
            }
            _ => {}
        }

        if !proposal.verify() {
            let response = self.respond(proposal, Err("proposal signature is invalid".to_string()));
            return Ok(ProposalResponse {
                status: 403,
                ..response
            });
        }

        let mut outcome = self.simulate(proposal);
        if fault == Some(PeerFault::Divergent) {
            if let Ok(simulated) = outcome.as_mut() {
                simulated.results.extend_from_slice(self.url.as_bytes());
            }
        }
        debug!(
            peer = %self.url,
            tx_id = %proposal.tx_id(),
            ok = outcome.is_ok(),
            "proposal simulated"
        );
        Ok(self.respond(proposal, outcome))
    }
}
