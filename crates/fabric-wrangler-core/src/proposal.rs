use crate::error::WranglerError;
use crate::identity::{Creator, Identity};
use crate::options::ChaincodeOptions;
use crate::types::TxId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// System chaincode that carries install, instantiate and upgrade proposals.
pub const LIFECYCLE_CHAINCODE: &str = "lscc";

/// Function invoked on a freshly instantiated or upgraded chaincode when the
/// caller names none.
pub const DEFAULT_INIT_FUNCTION: &str = "init";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalAction {
    Invoke,
    Query,
    Install,
    Instantiate,
    Upgrade,
}

impl ProposalAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Invoke => "invoke",
            Self::Query => "query",
            Self::Install => "install",
            Self::Instantiate => "deploy",
            Self::Upgrade => "upgrade",
        }
    }

    pub fn is_lifecycle(self) -> bool {
        matches!(self, Self::Install | Self::Instantiate | Self::Upgrade)
    }

    /// Whether the action may be sent to the ordering service.
    pub fn changes_state(self) -> bool {
        matches!(self, Self::Invoke | Self::Instantiate | Self::Upgrade)
    }
}

/// Deployment payload attached to lifecycle proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub chaincode_type: String,
    pub path: String,
    pub package: Vec<u8>,
}

impl DeploymentSpec {
    pub fn package_digest(&self) -> String {
        blake3::hash(&self.package).to_hex().to_string()
    }
}

/// Immutable transaction proposal. `tx_id` is the correlation key used by the
/// commit confirmer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub tx_id: TxId,
    pub channel_id: String,
    pub action: ProposalAction,
    pub chaincode_id: String,
    pub chaincode_version: String,
    pub function: String,
    pub args: Vec<String>,
    /// Handed to chaincode execution only; never part of the signed header.
    pub transient_map: BTreeMap<String, Vec<u8>>,
    pub deployment: Option<DeploymentSpec>,
    pub creator: Creator,
    pub nonce: String,
    pub timestamp: DateTime<Utc>,
}

impl Proposal {
    /// Chaincode the peers actually execute.
    pub fn target_chaincode(&self) -> &str {
        if self.action.is_lifecycle() {
            LIFECYCLE_CHAINCODE
        } else {
            &self.chaincode_id
        }
    }

    pub fn signing_digest(&self) -> Result<[u8; 32], WranglerError> {
        let material = serde_json::json!({
            "tx_id": self.tx_id,
            "channel_id": self.channel_id,
            "action": self.action,
            "target": self.target_chaincode(),
            "chaincode_id": self.chaincode_id,
            "chaincode_version": self.chaincode_version,
            "function": self.function,
            "args": self.args,
            "deployment": self.deployment.as_ref().map(|d| serde_json::json!({
                "type": d.chaincode_type,
                "path": d.path,
                "package": d.package_digest(),
            })),
            "creator": self.creator,
            "nonce": self.nonce,
            "timestamp": self.timestamp,
        });
        let bytes = serde_json::to_vec(&material).map_err(|e| {
            WranglerError::Serialization(format!("failed to encode proposal header: {e}"))
        })?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signature: Vec<u8>,
}

impl SignedProposal {
    pub fn tx_id(&self) -> &str {
        &self.proposal.tx_id
    }

    pub fn verify(&self) -> bool {
        self.proposal
            .signing_digest()
            .map(|digest| self.proposal.creator.verify(&digest, &self.signature))
            .unwrap_or(false)
    }
}

/// Transaction ids bind a fresh nonce to the submitting creator.
pub fn compute_tx_id(nonce: &[u8], creator: &Creator) -> TxId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(nonce);
    hasher.update(&creator.to_bytes());
    hasher.finalize().to_hex().to_string()
}

#[derive(Debug, Clone)]
pub struct ProposalBuilder {
    action: ProposalAction,
    channel_id: String,
    chaincode_id: String,
    chaincode_version: String,
    function: String,
    args: Vec<String>,
    transient_map: BTreeMap<String, Vec<u8>>,
    deployment: Option<DeploymentSpec>,
}

impl ProposalBuilder {
    pub fn new(action: ProposalAction, channel_id: impl Into<String>) -> Self {
        Self {
            action,
            channel_id: channel_id.into(),
            chaincode_id: String::new(),
            chaincode_version: String::new(),
            function: String::new(),
            args: Vec::new(),
            transient_map: BTreeMap::new(),
            deployment: None,
        }
    }

    pub fn from_options(
        action: ProposalAction,
        channel_id: impl Into<String>,
        options: &ChaincodeOptions,
    ) -> Self {
        Self::new(action, channel_id)
            .chaincode(&options.chaincode_id, &options.chaincode_version)
            .function(&options.cc_function)
            .args(options.cc_args.iter().cloned())
            .transient_map(options.transient_map.clone())
    }

    pub fn chaincode(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.chaincode_id = id.into();
        self.chaincode_version = version.into();
        self
    }

    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = function.into();
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn transient_map(mut self, transient_map: BTreeMap<String, Vec<u8>>) -> Self {
        self.transient_map = transient_map;
        self
    }

    pub fn deployment(mut self, deployment: DeploymentSpec) -> Self {
        self.deployment = Some(deployment);
        self
    }

    pub fn build(self, identity: &Identity) -> Result<SignedProposal, WranglerError> {
        let function = self.resolved_function();
        self.validate(&function)?;

        let creator = identity.creator();
        let nonce: [u8; 24] = rand::random();
        let tx_id = compute_tx_id(&nonce, &creator);

        let proposal = Proposal {
            tx_id,
            channel_id: self.channel_id,
            action: self.action,
            chaincode_id: self.chaincode_id.trim().to_string(),
            chaincode_version: self.chaincode_version.trim().to_string(),
            function,
            args: self.args,
            transient_map: self.transient_map,
            deployment: self.deployment,
            creator,
            nonce: hex::encode(nonce),
            timestamp: Utc::now(),
        };

        let signature = identity.sign(&proposal.signing_digest()?);
        debug!(
            tx_id = %proposal.tx_id,
            action = proposal.action.name(),
            chaincode = %proposal.chaincode_id,
            function = %proposal.function,
            "proposal built"
        );
        Ok(SignedProposal {
            proposal,
            signature,
        })
    }

    fn resolved_function(&self) -> String {
        let function = self.function.trim();
        match self.action {
            ProposalAction::Install => "install".to_string(),
            ProposalAction::Instantiate | ProposalAction::Upgrade if function.is_empty() => {
                DEFAULT_INIT_FUNCTION.to_string()
            }
            _ => function.to_string(),
        }
    }

    fn validate(&self, function: &str) -> Result<(), WranglerError> {
        if self.channel_id.trim().is_empty() {
            return Err(WranglerError::InvalidProposal(
                "channel id must not be empty".to_string(),
            ));
        }
        if self.chaincode_id.trim().is_empty() {
            return Err(WranglerError::InvalidProposal(
                "chaincode id must not be empty".to_string(),
            ));
        }
        if self.chaincode_version.trim().is_empty() {
            return Err(WranglerError::InvalidProposal(
                "chaincode version must not be empty".to_string(),
            ));
        }
        if function.is_empty() {
            return Err(WranglerError::InvalidProposal(
                "function name must not be empty".to_string(),
            ));
        }
        if self.action == ProposalAction::Install
            && self
                .deployment
                .as_ref()
                .map_or(true, |d| d.package.is_empty())
        {
            return Err(WranglerError::InvalidProposal(
                "install requires a non-empty chaincode package".to_string(),
            ));
        }
        Ok(())
    }
}
