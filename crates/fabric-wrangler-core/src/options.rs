use crate::error::WranglerError;
use crate::types::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Minimum number of agreeing endorsements needed to proceed.
///
/// Peers that fail to respond are excluded from the comparison; they only
/// count against the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsementPolicy {
    pub min_endorsements: usize,
}

impl Default for EndorsementPolicy {
    fn default() -> Self {
        Self {
            min_endorsements: 1,
        }
    }
}

impl EndorsementPolicy {
    pub fn at_least(min_endorsements: usize) -> Self {
        Self { min_endorsements }
    }
}

/// Per-wrangler defaults. Anything a call needs beyond these arrives in its
/// options record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WranglerConfig {
    pub block_delay: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub endorsement_policy: EndorsementPolicy,
}

impl Default for WranglerConfig {
    fn default() -> Self {
        Self {
            block_delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            endorsement_policy: EndorsementPolicy::default(),
        }
    }
}

impl WranglerConfig {
    pub fn with_block_delay(mut self, block_delay: Duration) -> Self {
        self.block_delay = block_delay;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_endorsement_policy(mut self, policy: EndorsementPolicy) -> Self {
        self.endorsement_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), WranglerError> {
        if self.endorsement_policy.min_endorsements == 0 {
            return Err(WranglerError::Configuration(
                "min_endorsements must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(WranglerError::Configuration(
                "request and connect timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for invoke, query, upgrade and instantiate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaincodeOptions {
    pub peers: Vec<Endpoint>,
    /// Empty means the channel bound to the identity context.
    pub channel_id: String,
    pub chaincode_id: String,
    pub chaincode_version: String,
    pub cc_function: String,
    pub cc_args: Vec<String>,
    pub event_urls: Vec<Endpoint>,
    pub transient_map: BTreeMap<String, Vec<u8>>,
    pub block_delay: Option<Duration>,
}

impl ChaincodeOptions {
    pub fn new(chaincode_id: impl Into<String>, chaincode_version: impl Into<String>) -> Self {
        Self {
            chaincode_id: chaincode_id.into(),
            chaincode_version: chaincode_version.into(),
            ..Self::default()
        }
    }

    pub fn with_peer(mut self, peer: Endpoint) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn with_peers(mut self, peers: impl IntoIterator<Item = Endpoint>) -> Self {
        self.peers.extend(peers);
        self
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = channel_id.into();
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.cc_function = function.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event_url(mut self, endpoint: Endpoint) -> Self {
        self.event_urls.push(endpoint);
        self
    }

    pub fn with_transient(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.transient_map.insert(key.into(), value.into());
        self
    }

    pub fn with_block_delay(mut self, block_delay: Duration) -> Self {
        self.block_delay = Some(block_delay);
        self
    }

    pub(crate) fn resolve_channel(&self, bound_channel: &str) -> Result<String, WranglerError> {
        let requested = self.channel_id.trim();
        if requested.is_empty() || requested == bound_channel {
            Ok(bound_channel.to_string())
        } else {
            Err(WranglerError::Configuration(format!(
                "options target channel '{}' but the identity is bound to '{}'",
                requested, bound_channel
            )))
        }
    }

    pub(crate) fn commit_event_source(&self) -> Result<&Endpoint, WranglerError> {
        let endpoint = self.event_urls.first().ok_or_else(|| {
            WranglerError::Configuration(
                "state-changing calls need at least one event url".to_string(),
            )
        })?;
        endpoint.validate()?;
        Ok(endpoint)
    }
}

pub(crate) fn validate_peers(peers: &[Endpoint]) -> Result<(), WranglerError> {
    if peers.is_empty() {
        return Err(WranglerError::Configuration(
            "at least one peer endpoint is required".to_string(),
        ));
    }
    peers.iter().try_for_each(Endpoint::validate)
}

/// Options for shipping a packaged chaincode to peers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub peers: Vec<Endpoint>,
    pub chaincode_id: String,
    pub chaincode_version: String,
    pub chaincode_type: String,
    pub chaincode_path: String,
    pub chaincode_package: Vec<u8>,
}

impl InstallOptions {
    pub fn new(
        chaincode_id: impl Into<String>,
        chaincode_version: impl Into<String>,
        chaincode_package: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            chaincode_id: chaincode_id.into(),
            chaincode_version: chaincode_version.into(),
            chaincode_type: "golang".to_string(),
            chaincode_package: chaincode_package.into(),
            ..Self::default()
        }
    }

    pub fn with_peers(mut self, peers: impl IntoIterator<Item = Endpoint>) -> Self {
        self.peers.extend(peers);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.chaincode_path = path.into();
        self
    }
}

/// Options for waiting on a named chaincode event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeEventOptions {
    pub event_url: Endpoint,
    pub chaincode_id: String,
    pub event_name: String,
    pub wait: Option<Duration>,
}

impl ChaincodeEventOptions {
    pub fn new(
        event_url: Endpoint,
        chaincode_id: impl Into<String>,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            event_url,
            chaincode_id: chaincode_id.into(),
            event_name: event_name.into(),
            wait: None,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = WranglerConfig::default();
        assert_eq!(config.block_delay, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.endorsement_policy.min_endorsements, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_quorum_is_rejected() {
        let config =
            WranglerConfig::default().with_endorsement_policy(EndorsementPolicy::at_least(0));
        assert!(matches!(
            config.validate(),
            Err(WranglerError::Configuration(_))
        ));
    }

    #[test]
    fn channel_resolution() {
        let opts = ChaincodeOptions::new("dfn", "v0");
        assert_eq!(opts.resolve_channel("mychannel").unwrap(), "mychannel");

        let opts = opts.with_channel("otherchannel");
        assert!(opts.resolve_channel("mychannel").is_err());
    }

    #[test]
    fn commit_event_source_requires_url() {
        let opts = ChaincodeOptions::new("dfn", "v0");
        assert!(opts.commit_event_source().is_err());

        let opts = opts
            .with_event_url(Endpoint::new("grpc://localhost:7053"))
            .with_event_url(Endpoint::new("grpc://localhost:8053"));
        assert_eq!(
            opts.commit_event_source().unwrap().url,
            "grpc://localhost:7053"
        );
    }

    #[test]
    fn peer_list_validation() {
        assert!(validate_peers(&[]).is_err());
        assert!(validate_peers(&[Endpoint::new("grpc://localhost:7051")]).is_ok());
        assert!(validate_peers(&[
            Endpoint::new("grpc://localhost:7051"),
            Endpoint::new("grpcs://localhost:8051"),
        ])
        .is_err());
    }
}
