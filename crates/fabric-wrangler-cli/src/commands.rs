//! Subcommand execution against a sandbox network seeded from the profile.

use crate::config::NetworkProfile;
use crate::error::{CliError, CliResult};
use crate::output;
use fabric_wrangler_adapters::{ProjectRegistry, SandboxNetwork};
use fabric_wrangler_core::{
    AdminCertEnroller, ChaincodeEventOptions, ChaincodeOptions, Enroller, FabricWrangler,
    IdentityContext, InstallOptions,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How the chaincode is seeded before the command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    /// Installed on every peer and instantiated at this version.
    Deployed(String),
    /// Known to the network but neither installed nor instantiated.
    Available,
}

/// One chaincode function call.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub chaincode_id: String,
    pub chaincode_version: String,
    pub function: String,
    pub args: Vec<String>,
    pub transient: Vec<(String, String)>,
    pub block_delay: Option<Duration>,
}

/// Lifecycle action run after installing the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deploy {
    Instantiate,
    Upgrade,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub chaincode_id: String,
    pub chaincode_version: String,
    pub path: String,
    pub bytes: Vec<u8>,
}

pub struct Session {
    profile: NetworkProfile,
    network: Arc<SandboxNetwork>,
    ctx: IdentityContext,
    wrangler: FabricWrangler,
}

impl Session {
    pub async fn open(profile: NetworkProfile, chaincode_id: &str, seed: Seed) -> CliResult<Self> {
        let mut builder = SandboxNetwork::builder(&profile.channel_id)
            .block_interval(profile.block_interval());
        for peer in &profile.peers {
            builder = builder.peer(&peer.url, &peer.event_url);
        }
        for orderer in &profile.orderers {
            builder = builder.orderer(orderer);
        }
        builder = match &seed {
            Seed::Deployed(version) => {
                builder.chaincode(chaincode_id, version, Arc::new(ProjectRegistry))
            }
            Seed::Available => {
                builder.available_chaincode(chaincode_id, Arc::new(ProjectRegistry))
            }
        };
        let network = builder.build();

        let ctx = AdminCertEnroller::new(network.clone())
            .enroll(profile.enrollment_options())
            .await?;
        let wrangler = FabricWrangler::new(profile.wrangler_config())?;
        info!(
            channel_id = %profile.channel_id,
            chaincode = %chaincode_id,
            seed = ?seed,
            "session opened"
        );
        Ok(Self {
            profile,
            network,
            ctx,
            wrangler,
        })
    }

    pub fn network(&self) -> &Arc<SandboxNetwork> {
        &self.network
    }

    fn options(&self, call: &Call) -> ChaincodeOptions {
        let mut options = ChaincodeOptions::new(&call.chaincode_id, &call.chaincode_version)
            .with_peers(self.profile.peer_endpoints())
            .with_channel(&self.profile.channel_id)
            .with_function(&call.function)
            .with_args(call.args.iter().cloned());
        if let Some(event_url) = self.profile.event_endpoints().into_iter().next() {
            options = options.with_event_url(event_url);
        }
        for (key, value) in &call.transient {
            options = options.with_transient(key, value.as_bytes());
        }
        if let Some(block_delay) = call.block_delay {
            options = options.with_block_delay(block_delay);
        }
        options
    }

    pub async fn invoke(&self, call: &Call) -> CliResult<Value> {
        let result = self.wrangler.invoke(&self.ctx, &self.options(call)).await?;
        Ok(output::invocation(&result))
    }

    pub async fn query(&self, call: &Call) -> CliResult<Value> {
        let result = self.wrangler.query(&self.ctx, &self.options(call)).await?;
        Ok(output::query(&result))
    }

    pub async fn install(&self, package: &Package) -> CliResult<Value> {
        let options = InstallOptions::new(
            &package.chaincode_id,
            &package.chaincode_version,
            package.bytes.clone(),
        )
        .with_path(&package.path)
        .with_peers(self.profile.peer_endpoints());
        let report = self.wrangler.install(&self.ctx, &options).await?;
        Ok(output::install(&report))
    }

    /// Installs the package on every peer, then instantiates or upgrades it.
    pub async fn deploy(
        &self,
        action: Deploy,
        package: &Package,
        args: &[String],
    ) -> CliResult<Value> {
        let install = self.install(package).await?;
        let call = Call {
            chaincode_id: package.chaincode_id.clone(),
            chaincode_version: package.chaincode_version.clone(),
            args: args.to_vec(),
            ..Call::default()
        };
        let options = self.options(&call);
        let result = match action {
            Deploy::Instantiate => self.wrangler.instantiate(&self.ctx, &options).await?,
            Deploy::Upgrade => self.wrangler.upgrade(&self.ctx, &options).await?,
        };
        Ok(json!({
            "install": install,
            "deployment": output::invocation(&result),
        }))
    }

    /// Waits for a named chaincode event. With `trigger`, the call is invoked
    /// after the filter is registered so the sandbox has something to emit.
    /// A failed trigger drops the watch, which releases its subscription.
    pub async fn watch_event(
        &self,
        chaincode_id: &str,
        event_name: &str,
        wait: Duration,
        trigger: Option<&Call>,
    ) -> CliResult<Value> {
        let event_url = self
            .profile
            .event_endpoints()
            .into_iter()
            .next()
            .ok_or_else(|| CliError::Profile("no event url in profile".to_string()))?;
        let options =
            ChaincodeEventOptions::new(event_url, chaincode_id, event_name).with_wait(wait);

        let watch = self
            .wrangler
            .subscribe_chaincode_event(&self.ctx, &options)
            .await?;
        let triggered = match trigger {
            Some(call) => Some(self.invoke(call).await?),
            None => None,
        };
        let watched = watch.wait().await?;

        let mut value = output::event(&watched);
        if let Some(triggered) = triggered {
            value["trigger"] = triggered;
        }
        Ok(value)
    }
}
