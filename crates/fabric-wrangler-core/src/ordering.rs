use crate::endorsement::EndorsementSet;
use crate::error::{TransportError, WranglerError};
use crate::identity::IdentityContext;
use crate::proposal::SignedProposal;
use crate::types::{BroadcastStatus, OrderingAck, TransactionEnvelope};
use std::time::Duration;
use tracing::{info, warn};

/// Packages agreed endorsements into a signed envelope and hands it to the
/// ordering service.
///
/// The channel's orderers are one logical service: they are tried in order,
/// moving on only when a node cannot be reached. A status answer from any
/// node is final.
#[derive(Debug, Clone)]
pub struct OrderingSubmitter {
    request_timeout: Duration,
}

impl OrderingSubmitter {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    pub fn envelope(
        ctx: &IdentityContext,
        proposal: &SignedProposal,
        endorsements: &EndorsementSet,
    ) -> Result<TransactionEnvelope, WranglerError> {
        if !proposal.proposal.action.changes_state() {
            return Err(WranglerError::InvalidProposal(format!(
                "'{}' proposals are never ordered",
                proposal.proposal.action.name()
            )));
        }
        if endorsements.endorsements.is_empty() || endorsements.tx_id != proposal.tx_id() {
            return Err(WranglerError::NoEndorsement {
                required: 1,
                received: 0,
                failures: endorsements.failures.clone(),
            });
        }

        let digest = TransactionEnvelope::signing_digest(proposal, &endorsements.endorsements);
        Ok(TransactionEnvelope {
            tx_id: proposal.tx_id().to_string(),
            channel_id: proposal.proposal.channel_id.clone(),
            proposal: proposal.clone(),
            endorsements: endorsements.endorsements.clone(),
            signature: ctx.identity.sign(&digest),
        })
    }

    pub async fn submit(
        &self,
        ctx: &IdentityContext,
        proposal: &SignedProposal,
        endorsements: &EndorsementSet,
    ) -> Result<OrderingAck, WranglerError> {
        let envelope = Self::envelope(ctx, proposal, endorsements)?;
        let orderers = &ctx.context.channel.orderers;
        if orderers.is_empty() {
            return Err(WranglerError::Configuration(format!(
                "channel '{}' has no orderers",
                ctx.channel_id()
            )));
        }

        let mut last_error = None;
        for endpoint in orderers {
            let attempt = match ctx.context.client.transport().orderer(endpoint) {
                Ok(orderer) => {
                    match tokio::time::timeout(self.request_timeout, orderer.broadcast(&envelope))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(TransportError::Timeout {
                            endpoint: endpoint.url.clone(),
                            millis: self.request_timeout.as_millis() as u64,
                        }),
                    }
                }
                Err(err) => Err(err),
            };

            match attempt {
                Ok(response) if response.status == BroadcastStatus::Success => {
                    info!(
                        tx_id = %envelope.tx_id,
                        orderer = %endpoint.url,
                        "envelope accepted for ordering"
                    );
                    return Ok(OrderingAck {
                        tx_id: envelope.tx_id,
                        orderer: endpoint.url.clone(),
                        status: response.status,
                    });
                }
                Ok(response) => {
                    warn!(
                        tx_id = %envelope.tx_id,
                        orderer = %endpoint.url,
                        status = %response.status,
                        "ordering service rejected envelope"
                    );
                    return Err(WranglerError::OrderingRejected {
                        status: response.status.to_string(),
                        info: response.info,
                    });
                }
                Err(err) => {
                    warn!(
                        tx_id = %envelope.tx_id,
                        orderer = %endpoint.url,
                        error = %err,
                        "orderer unavailable, trying next"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .map(WranglerError::Transport)
            .unwrap_or_else(|| WranglerError::Configuration("no orderer attempted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endorsement::{EndorsementCollector, EndorsementSet};
    use crate::options::EndorsementPolicy;
    use crate::proposal::{ProposalAction, ProposalBuilder};
    use crate::testing::{PeerScript, ScriptedTransport};
    use crate::types::Endpoint;
    use std::sync::atomic::Ordering;

    const PEER: &str = "grpc://peer0:7051";
    const O1: &str = "grpc://orderer1:7050";
    const O2: &str = "grpc://orderer2:7050";

    async fn endorsed(
        ctx: &IdentityContext,
        action: ProposalAction,
    ) -> (SignedProposal, EndorsementSet) {
        let signed = ProposalBuilder::new(action, "mychannel")
            .chaincode("dfn", "v0")
            .function("create_project")
            .build(&ctx.identity)
            .unwrap();
        let set = EndorsementCollector::new(Duration::from_secs(1), EndorsementPolicy::default())
            .gather(&ctx.context.client, &[Endpoint::new(PEER)], &signed)
            .await
            .unwrap();
        (signed, set)
    }

    #[tokio::test]
    async fn accepted_envelope_yields_ack() {
        let (ctx, counters) = ScriptedTransport::default()
            .with_peer(PEER, PeerScript::ok("ok", "rw"))
            .with_orderer(O1, Ok(BroadcastStatus::Success))
            .into_context(&[O1]);
        let (signed, set) = endorsed(&ctx, ProposalAction::Invoke).await;

        let ack = OrderingSubmitter::new(Duration::from_secs(1))
            .submit(&ctx, &signed, &set)
            .await
            .unwrap();
        assert_eq!(ack.tx_id, signed.tx_id());
        assert_eq!(ack.orderer, O1);
        assert_eq!(counters.broadcasts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejection_is_final() {
        let (ctx, counters) = ScriptedTransport::default()
            .with_peer(PEER, PeerScript::ok("ok", "rw"))
            .with_orderer(O1, Ok(BroadcastStatus::BadRequest))
            .with_orderer(O2, Ok(BroadcastStatus::Success))
            .into_context(&[O1, O2]);
        let (signed, set) = endorsed(&ctx, ProposalAction::Invoke).await;

        let err = OrderingSubmitter::new(Duration::from_secs(1))
            .submit(&ctx, &signed, &set)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WranglerError::OrderingRejected { ref status, .. } if status == "BAD_REQUEST"
        ));
        assert_eq!(counters.broadcasts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fails_over_on_unreachable_orderer() {
        let (ctx, counters) = ScriptedTransport::default()
            .with_peer(PEER, PeerScript::ok("ok", "rw"))
            .with_orderer(O1, Err(TransportError::Unreachable(O1.to_string())))
            .with_orderer(O2, Ok(BroadcastStatus::Success))
            .into_context(&[O1, O2]);
        let (signed, set) = endorsed(&ctx, ProposalAction::Invoke).await;

        let ack = OrderingSubmitter::new(Duration::from_secs(1))
            .submit(&ctx, &signed, &set)
            .await
            .unwrap();
        assert_eq!(ack.orderer, O2);
        assert_eq!(counters.broadcasts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_orderers_down_is_transport_error() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(PEER, PeerScript::ok("ok", "rw"))
            .into_context(&[O1]);
        let (signed, set) = endorsed(&ctx, ProposalAction::Invoke).await;

        let err = OrderingSubmitter::new(Duration::from_secs(1))
            .submit(&ctx, &signed, &set)
            .await
            .unwrap_err();
        assert!(matches!(err, WranglerError::Transport(_)));
    }

    #[tokio::test]
    async fn queries_are_never_ordered() {
        let (ctx, counters) = ScriptedTransport::default()
            .with_peer(PEER, PeerScript::ok("ok", "rw"))
            .with_orderer(O1, Ok(BroadcastStatus::Success))
            .into_context(&[O1]);
        let (signed, set) = endorsed(&ctx, ProposalAction::Query).await;

        let err = OrderingSubmitter::new(Duration::from_secs(1))
            .submit(&ctx, &signed, &set)
            .await
            .unwrap_err();
        assert!(matches!(err, WranglerError::InvalidProposal(_)));
        assert_eq!(counters.broadcasts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn envelope_signature_covers_endorsements() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(PEER, PeerScript::ok("ok", "rw"))
            .into_context(&[O1]);
        let (signed, set) = endorsed(&ctx, ProposalAction::Invoke).await;

        let envelope = OrderingSubmitter::envelope(&ctx, &signed, &set).unwrap();
        let digest =
            TransactionEnvelope::signing_digest(&envelope.proposal, &envelope.endorsements);
        let creator = ctx.identity.creator();
        assert!(creator.verify(&digest, &envelope.signature));
        assert_eq!(envelope.channel_id, "mychannel");
    }
}
