//! fcw - chaincode invocation and lifecycle from the command line.
//!
//! Every subcommand loads a network profile, enrolls the profile's admin
//! identity, runs one operation against the sandbox network described by the
//! profile and prints the terminal result as JSON.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fabric_wrangler_cli::{output, Call, Deploy, NetworkProfile, Package, Seed, Session};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fcw", about = "Fabric chaincode wrangler")]
#[command(version)]
struct Cli {
    /// Network profile (JSON, or TOML with a .toml extension)
    #[arg(short, long, env = "FCW_PROFILE")]
    profile: PathBuf,

    /// Chaincode id
    #[arg(long, env = "FCW_CHAINCODE_ID", default_value = "dfn")]
    chaincode_id: String,

    /// Chaincode version currently instantiated on the channel
    #[arg(long, env = "FCW_CHAINCODE_VERSION", default_value = "v0")]
    chaincode_version: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a chaincode function and wait for commit
    Invoke(CallArgs),

    /// Evaluate a chaincode function on the endorsing peers only
    Query(CallArgs),

    /// Install a chaincode package on every profile peer
    Install(PackageArgs),

    /// Install, then instantiate a chaincode that is not yet on the channel
    Instantiate(DeployArgs),

    /// Install, then upgrade the instantiated chaincode
    Upgrade(DeployArgs),

    /// Wait for a named chaincode event
    WatchEvent(WatchArgs),
}

#[derive(Args)]
struct CallArgs {
    /// Chaincode function
    function: String,

    /// Function arguments
    args: Vec<String>,

    /// Transient data entry, repeatable
    #[arg(long = "transient", value_parser = parse_key_value)]
    transient: Vec<(String, String)>,

    /// Override the profile's block delay
    #[arg(long)]
    block_delay_ms: Option<u64>,
}

#[derive(Args)]
struct PackageArgs {
    /// Version to install
    #[arg(long)]
    version: String,

    /// Packaged chaincode archive
    #[arg(long)]
    package: PathBuf,

    /// Chaincode source path recorded in the deployment spec
    #[arg(long, default_value = "")]
    path: String,
}

#[derive(Args)]
struct DeployArgs {
    #[command(flatten)]
    package: PackageArgs,

    /// Init arguments
    args: Vec<String>,
}

#[derive(Args)]
struct WatchArgs {
    /// Event name emitted by the chaincode
    event_name: String,

    #[arg(long, default_value_t = 30_000)]
    wait_ms: u64,

    /// Invoke this function once the watcher is registered
    #[arg(long)]
    then_invoke: Option<String>,

    /// Arguments for --then-invoke
    #[arg(long = "then-arg")]
    then_args: Vec<String>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

impl Cli {
    fn call(&self, args: &CallArgs) -> Call {
        Call {
            chaincode_id: self.chaincode_id.clone(),
            chaincode_version: self.chaincode_version.clone(),
            function: args.function.clone(),
            args: args.args.clone(),
            transient: args.transient.clone(),
            block_delay: args.block_delay_ms.map(Duration::from_millis),
        }
    }

    fn package(&self, args: &PackageArgs) -> Result<Package> {
        let bytes = std::fs::read(&args.package)
            .with_context(|| format!("reading package {}", args.package.display()))?;
        Ok(Package {
            chaincode_id: self.chaincode_id.clone(),
            chaincode_version: args.version.clone(),
            path: args.path.clone(),
            bytes,
        })
    }

    fn seed(&self) -> Seed {
        match self.command {
            Commands::Instantiate(_) => Seed::Available,
            _ => Seed::Deployed(self.chaincode_version.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "fabric_wrangler=debug,info"
    } else {
        "fabric_wrangler=info,info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let profile = NetworkProfile::load(&cli.profile)
        .with_context(|| format!("loading profile {}", cli.profile.display()))?;
    let session = Session::open(profile, &cli.chaincode_id, cli.seed()).await?;

    let value = match &cli.command {
        Commands::Invoke(args) => session.invoke(&cli.call(args)).await?,
        Commands::Query(args) => session.query(&cli.call(args)).await?,
        Commands::Install(args) => session.install(&cli.package(args)?).await?,
        Commands::Instantiate(args) => {
            session
                .deploy(Deploy::Instantiate, &cli.package(&args.package)?, &args.args)
                .await?
        }
        Commands::Upgrade(args) => {
            session
                .deploy(Deploy::Upgrade, &cli.package(&args.package)?, &args.args)
                .await?
        }
        Commands::WatchEvent(args) => {
            let trigger = args.then_invoke.as_ref().map(|function| Call {
                chaincode_id: cli.chaincode_id.clone(),
                chaincode_version: cli.chaincode_version.clone(),
                function: function.clone(),
                args: args.then_args.clone(),
                ..Call::default()
            });
            session
                .watch_event(
                    &cli.chaincode_id,
                    &args.event_name,
                    Duration::from_millis(args.wait_ms),
                    trigger.as_ref(),
                )
                .await?
        }
    };

    output::print(&value)?;
    Ok(())
}
