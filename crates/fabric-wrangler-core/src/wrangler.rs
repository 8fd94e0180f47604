use crate::commit::{CommitConfirmer, Confirmation, PendingConfirmation};
use crate::endorsement::EndorsementCollector;
use crate::error::WranglerError;
use crate::identity::IdentityContext;
use crate::lifecycle::LifecycleManager;
use crate::options::{
    validate_peers, ChaincodeEventOptions, ChaincodeOptions, InstallOptions, WranglerConfig,
};
use crate::ordering::OrderingSubmitter;
use crate::proposal::{ProposalAction, ProposalBuilder, SignedProposal};
use crate::types::{
    EventFilter, EventWatchResult, InstallReport, InvocationResult, InvocationStatus, QueryResult,
};
use tracing::{info, instrument, warn};

/// Public surface of the orchestration layer.
///
/// Holds no per-call state: every call owns its proposal, endorsement set
/// and event subscription, so one wrangler can serve concurrent calls.
#[derive(Debug, Clone)]
pub struct FabricWrangler {
    config: WranglerConfig,
    collector: EndorsementCollector,
    submitter: OrderingSubmitter,
    confirmer: CommitConfirmer,
    lifecycle: LifecycleManager,
}

impl FabricWrangler {
    pub fn new(config: WranglerConfig) -> Result<Self, WranglerError> {
        config.validate()?;
        let collector =
            EndorsementCollector::new(config.request_timeout, config.endorsement_policy);
        Ok(Self {
            submitter: OrderingSubmitter::new(config.request_timeout),
            confirmer: CommitConfirmer::new(config.connect_timeout),
            lifecycle: LifecycleManager::new(collector.clone()),
            collector,
            config,
        })
    }

    pub fn config(&self) -> &WranglerConfig {
        &self.config
    }

    /// State-changing chaincode call: propose, endorse, order, confirm.
    #[instrument(
        skip(self, ctx, options),
        fields(chaincode = %options.chaincode_id, function = %options.cc_function)
    )]
    pub async fn invoke(
        &self,
        ctx: &IdentityContext,
        options: &ChaincodeOptions,
    ) -> Result<InvocationResult, WranglerError> {
        self.preflight(options)?;
        let channel_id = options.resolve_channel(ctx.channel_id())?;
        let proposal = ProposalBuilder::from_options(ProposalAction::Invoke, channel_id, options)
            .build(&ctx.identity)?;
        self.execute(ctx, options, proposal).await
    }

    /// Read-only call. Stops after endorsement; nothing is ordered and no
    /// event subscription is opened.
    #[instrument(
        skip(self, ctx, options),
        fields(chaincode = %options.chaincode_id, function = %options.cc_function)
    )]
    pub async fn query(
        &self,
        ctx: &IdentityContext,
        options: &ChaincodeOptions,
    ) -> Result<QueryResult, WranglerError> {
        validate_peers(&options.peers)?;
        let channel_id = options.resolve_channel(ctx.channel_id())?;
        let proposal = ProposalBuilder::from_options(ProposalAction::Query, channel_id, options)
            .build(&ctx.identity)?;

        let set = self
            .collector
            .gather(&ctx.context.client, &options.peers, &proposal)
            .await?;

        info!(
            tx_id = %set.tx_id,
            responses = set.endorsements.len(),
            failed = set.failures.len(),
            "query completed"
        );
        Ok(QueryResult {
            peer_payloads: set.peer_payloads(),
            tx_id: set.tx_id,
            failed_peers: set.failures,
        })
    }

    #[instrument(
        skip(self, ctx, options),
        fields(chaincode = %options.chaincode_id, version = %options.chaincode_version)
    )]
    pub async fn install(
        &self,
        ctx: &IdentityContext,
        options: &InstallOptions,
    ) -> Result<InstallReport, WranglerError> {
        self.lifecycle.install(ctx, options).await
    }

    #[instrument(
        skip(self, ctx, options),
        fields(chaincode = %options.chaincode_id, version = %options.chaincode_version)
    )]
    pub async fn upgrade(
        &self,
        ctx: &IdentityContext,
        options: &ChaincodeOptions,
    ) -> Result<InvocationResult, WranglerError> {
        self.preflight(options)?;
        let proposal = self
            .lifecycle
            .lifecycle_proposal(ctx, ProposalAction::Upgrade, options)?;
        self.execute(ctx, options, proposal).await
    }

    #[instrument(
        skip(self, ctx, options),
        fields(chaincode = %options.chaincode_id, version = %options.chaincode_version)
    )]
    pub async fn instantiate(
        &self,
        ctx: &IdentityContext,
        options: &ChaincodeOptions,
    ) -> Result<InvocationResult, WranglerError> {
        self.preflight(options)?;
        let proposal =
            self.lifecycle
                .lifecycle_proposal(ctx, ProposalAction::Instantiate, options)?;
        self.execute(ctx, options, proposal).await
    }

    /// Waits for the next `(chaincode id, event name)` event on one peer.
    #[instrument(
        skip(self, ctx, options),
        fields(chaincode = %options.chaincode_id, event = %options.event_name)
    )]
    pub async fn watch_chaincode_event(
        &self,
        ctx: &IdentityContext,
        options: &ChaincodeEventOptions,
    ) -> Result<EventWatchResult, WranglerError> {
        self.subscribe_chaincode_event(ctx, options)
            .await?
            .wait()
            .await
    }

    /// Registers the event filter and returns before waiting, so the caller
    /// can trigger the event knowing it will be delivered.
    pub async fn subscribe_chaincode_event(
        &self,
        ctx: &IdentityContext,
        options: &ChaincodeEventOptions,
    ) -> Result<ChaincodeEventWatch, WranglerError> {
        options.event_url.validate()?;
        if options.chaincode_id.trim().is_empty() || options.event_name.trim().is_empty() {
            return Err(WranglerError::Configuration(
                "chaincode id and event name are required".to_string(),
            ));
        }

        let filter =
            EventFilter::chaincode_event(options.chaincode_id.trim(), options.event_name.trim());
        let wait = options.wait.unwrap_or(self.config.block_delay);
        let pending = self
            .confirmer
            .subscribe(&ctx.context.client, &options.event_url, filter, wait)
            .await?;
        Ok(ChaincodeEventWatch { pending })
    }

    fn preflight(&self, options: &ChaincodeOptions) -> Result<(), WranglerError> {
        validate_peers(&options.peers)?;
        options.commit_event_source()?;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &IdentityContext,
        options: &ChaincodeOptions,
        proposal: SignedProposal,
    ) -> Result<InvocationResult, WranglerError> {
        let client = &ctx.context.client;
        let event_source = options.commit_event_source()?;

        let endorsements = self
            .collector
            .collect(client, &options.peers, &proposal)
            .await?;
        let ack = self.submitter.submit(ctx, &proposal, &endorsements).await?;

        let block_delay = options.block_delay.unwrap_or(self.config.block_delay);
        let confirmation = self
            .confirmer
            .confirm(
                client,
                event_source,
                EventFilter::transaction(&ack.tx_id),
                block_delay,
            )
            .await
            .map_err(|err| err.with_tx_id(&ack.tx_id))?;

        let (status, detail) = match confirmation {
            Confirmation::Committed { block_number } => {
                (InvocationStatus::Committed { block_number }, None)
            }
            Confirmation::ChaincodeEvent(event) => (
                InvocationStatus::Committed {
                    block_number: event.block_number,
                },
                None,
            ),
            Confirmation::Rejected {
                block_number,
                validation_code,
            } => (
                InvocationStatus::Rejected {
                    block_number,
                    validation_code,
                },
                Some(format!(
                    "transaction invalidated at commit: {}",
                    validation_code
                )),
            ),
            Confirmation::TimedOut => (
                InvocationStatus::TimedOut,
                Some(format!(
                    "no commit event within {}ms; query the ledger to learn the outcome",
                    block_delay.as_millis()
                )),
            ),
        };

        if status == InvocationStatus::TimedOut {
            warn!(tx_id = %ack.tx_id, "commit confirmation timed out");
        } else {
            info!(tx_id = %ack.tx_id, status = ?status, "commit confirmed");
        }

        Ok(InvocationResult {
            tx_id: ack.tx_id,
            status,
            peer_payloads: endorsements.peer_payloads(),
            failed_peers: endorsements.failures,
            detail,
        })
    }
}

/// A registered chaincode-event filter awaiting its first match.
pub struct ChaincodeEventWatch {
    pending: PendingConfirmation,
}

impl ChaincodeEventWatch {
    pub async fn wait(self) -> Result<EventWatchResult, WranglerError> {
        match self.pending.wait().await? {
            Confirmation::ChaincodeEvent(event) => Ok(EventWatchResult::Received(event)),
            Confirmation::TimedOut => Ok(EventWatchResult::TimedOut),
            other => Err(WranglerError::InvariantViolation(format!(
                "chaincode event watch resolved with {:?}",
                other
            ))),
        }
    }
}
