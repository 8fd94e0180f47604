use crate::endorsement::{EndorsementCollector, PeerOutcome};
use crate::error::WranglerError;
use crate::identity::IdentityContext;
use crate::options::{validate_peers, ChaincodeOptions, InstallOptions};
use crate::proposal::{DeploymentSpec, ProposalAction, ProposalBuilder, SignedProposal};
use crate::types::InstallReport;
use tracing::{info, warn};

/// Install fan-out and construction of lifecycle proposals.
///
/// Upgrade and instantiate are ordinary invocations of the lifecycle system
/// chaincode; this type only builds their proposals and the caller runs them
/// through the regular pipeline.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    collector: EndorsementCollector,
}

impl LifecycleManager {
    pub fn new(collector: EndorsementCollector) -> Self {
        Self { collector }
    }

    /// Ships the package to every peer independently. Per-peer failures are
    /// reported in the result; only malformed input is an error.
    pub async fn install(
        &self,
        ctx: &IdentityContext,
        options: &InstallOptions,
    ) -> Result<InstallReport, WranglerError> {
        validate_peers(&options.peers)?;
        let proposal = ProposalBuilder::new(ProposalAction::Install, ctx.channel_id())
            .chaincode(&options.chaincode_id, &options.chaincode_version)
            .deployment(DeploymentSpec {
                chaincode_type: options.chaincode_type.clone(),
                path: options.chaincode_path.clone(),
                package: options.chaincode_package.clone(),
            })
            .build(&ctx.identity)?;

        let outcomes = self
            .collector
            .dispatch(&ctx.context.client, &options.peers, &proposal)
            .await;

        let mut report = InstallReport {
            chaincode_id: proposal.proposal.chaincode_id.clone(),
            chaincode_version: proposal.proposal.chaincode_version.clone(),
            installed: Vec::new(),
            failures: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                PeerOutcome::Endorsed(endorsement) => {
                    info!(
                        peer = %endorsement.peer,
                        chaincode = %report.chaincode_id,
                        version = %report.chaincode_version,
                        "chaincode installed"
                    );
                    report.installed.push(endorsement.peer);
                }
                PeerOutcome::Failed(failure) => {
                    warn!(
                        peer = %failure.peer,
                        chaincode = %report.chaincode_id,
                        error = %failure.error,
                        "chaincode install failed"
                    );
                    report.failures.push(failure);
                }
            }
        }
        Ok(report)
    }

    pub fn lifecycle_proposal(
        &self,
        ctx: &IdentityContext,
        action: ProposalAction,
        options: &ChaincodeOptions,
    ) -> Result<SignedProposal, WranglerError> {
        if !matches!(action, ProposalAction::Upgrade | ProposalAction::Instantiate) {
            return Err(WranglerError::InvalidProposal(format!(
                "'{}' is not a lifecycle deployment action",
                action.name()
            )));
        }
        let channel_id = options.resolve_channel(ctx.channel_id())?;
        ProposalBuilder::from_options(action, channel_id, options).build(&ctx.identity)
    }
}
