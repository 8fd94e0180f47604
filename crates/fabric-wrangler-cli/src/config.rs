//! Network profile loading.

use crate::error::{CliError, CliResult};
use fabric_wrangler_core::{
    EndorsementPolicy, EnrollmentOptions, Endpoint, TlsOptions, WranglerConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One endorsing peer and its event endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProfile {
    pub name: String,
    pub url: String,
    pub event_url: String,
    /// PEM of the peer's TLS CA, required for `grpcs://` urls.
    #[serde(default)]
    pub tls_pem: Option<String>,
    #[serde(default)]
    pub ssl_target_name_override: Option<String>,
}

impl PeerProfile {
    fn tls(&self) -> TlsOptions {
        TlsOptions {
            pem: self.tls_pem.clone(),
            ssl_target_name_override: self.ssl_target_name_override.clone(),
            default_authority: self.ssl_target_name_override.clone(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.url).with_tls(self.tls())
    }

    pub fn event_endpoint(&self) -> Endpoint {
        Endpoint::new(&self.event_url).with_tls(self.tls())
    }
}

/// Channel, organization and timing settings for one network.
///
/// Read from JSON, or TOML when the file ends in `.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub channel_id: String,
    pub msp_id: String,
    /// Hex encoded 32-byte signing key of the organization admin.
    pub admin_key_hex: String,
    pub admin_cert: String,
    pub peers: Vec<PeerProfile>,
    pub orderers: Vec<String>,
    #[serde(default = "default_block_delay_ms")]
    pub block_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_min_endorsements")]
    pub min_endorsements: usize,
    /// Delay between ordering and block delivery in the sandbox network.
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
}

fn default_block_delay_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_min_endorsements() -> usize {
    1
}

fn default_block_interval_ms() -> u64 {
    200
}

impl NetworkProfile {
    pub fn load(path: &Path) -> CliResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let profile: NetworkProfile = if is_toml {
            toml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> CliResult<()> {
        if self.channel_id.trim().is_empty() {
            return Err(CliError::Profile("channel_id is required".to_string()));
        }
        if self.peers.is_empty() {
            return Err(CliError::Profile("at least one peer is required".to_string()));
        }
        if self.orderers.is_empty() {
            return Err(CliError::Profile(
                "at least one orderer is required".to_string(),
            ));
        }
        for peer in &self.peers {
            peer.endpoint().validate()?;
            peer.event_endpoint().validate()?;
        }
        Ok(())
    }

    pub fn peer_endpoints(&self) -> Vec<Endpoint> {
        self.peers.iter().map(PeerProfile::endpoint).collect()
    }

    pub fn event_endpoints(&self) -> Vec<Endpoint> {
        self.peers.iter().map(PeerProfile::event_endpoint).collect()
    }

    pub fn orderer_endpoints(&self) -> Vec<Endpoint> {
        self.orderers.iter().map(Endpoint::new).collect()
    }

    pub fn block_delay(&self) -> Duration {
        Duration::from_millis(self.block_delay_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }

    pub fn wrangler_config(&self) -> WranglerConfig {
        WranglerConfig::default()
            .with_block_delay(self.block_delay())
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_endorsement_policy(EndorsementPolicy::at_least(self.min_endorsements))
    }

    pub fn enrollment_options(&self) -> EnrollmentOptions {
        EnrollmentOptions {
            msp_id: self.msp_id.clone(),
            private_key_hex: self.admin_key_hex.clone(),
            certificate: self.admin_cert.clone(),
            channel_id: self.channel_id.clone(),
            orderers: self.orderer_endpoints(),
        }
    }
}
