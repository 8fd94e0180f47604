use crate::error::{TransportError, WranglerError};
use crate::identity::ClientHandle;
use crate::options::EndorsementPolicy;
use crate::proposal::SignedProposal;
use crate::types::{Endorsement, Endpoint, PeerFailure, PeerPayload, TxId};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a single peer contributed to the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOutcome {
    Endorsed(Endorsement),
    Failed(PeerFailure),
}

impl PeerOutcome {
    pub fn peer(&self) -> &str {
        match self {
            Self::Endorsed(endorsement) => &endorsement.peer,
            Self::Failed(failure) => &failure.peer,
        }
    }
}

/// Endorsements of one proposal, in peer-list order, plus the peers that
/// did not endorse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndorsementSet {
    pub tx_id: TxId,
    pub endorsements: Vec<Endorsement>,
    pub failures: Vec<PeerFailure>,
}

impl EndorsementSet {
    pub fn from_outcomes(tx_id: impl Into<TxId>, outcomes: Vec<PeerOutcome>) -> Self {
        let mut endorsements = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                PeerOutcome::Endorsed(endorsement) => endorsements.push(endorsement),
                PeerOutcome::Failed(failure) => failures.push(failure),
            }
        }
        Self {
            tx_id: tx_id.into(),
            endorsements,
            failures,
        }
    }

    pub fn peer_payloads(&self) -> Vec<PeerPayload> {
        self.endorsements
            .iter()
            .map(|e| PeerPayload {
                peer: e.peer.clone(),
                payload: e.payload.clone(),
            })
            .collect()
    }

    /// The single read/write-set digest shared by every endorsement, if any.
    pub fn agreed_digest(&self) -> Option<&str> {
        let first = self.endorsements.first()?.rwset_digest.as_str();
        self.endorsements
            .iter()
            .all(|e| e.rwset_digest == first)
            .then_some(first)
    }
}

/// Parallel endorsement fan-out with a full join before any decision.
#[derive(Debug, Clone)]
pub struct EndorsementCollector {
    request_timeout: Duration,
    policy: EndorsementPolicy,
}

impl EndorsementCollector {
    pub fn new(request_timeout: Duration, policy: EndorsementPolicy) -> Self {
        Self {
            request_timeout,
            policy,
        }
    }

    /// Sends the proposal to every peer concurrently and waits for each to
    /// answer, fail or time out. Returns exactly one outcome per peer, in
    /// peer-list order.
    pub async fn dispatch(
        &self,
        client: &ClientHandle,
        peers: &[Endpoint],
        proposal: &SignedProposal,
    ) -> Vec<PeerOutcome> {
        let requests = peers
            .iter()
            .map(|endpoint| self.request_endorsement(client, endpoint, proposal));
        join_all(requests).await
    }

    /// Dispatch, then enforce the minimum-endorsement policy.
    pub async fn gather(
        &self,
        client: &ClientHandle,
        peers: &[Endpoint],
        proposal: &SignedProposal,
    ) -> Result<EndorsementSet, WranglerError> {
        let outcomes = self.dispatch(client, peers, proposal).await;
        let set = EndorsementSet::from_outcomes(proposal.tx_id(), outcomes);

        let required = self.policy.min_endorsements.max(1);
        if set.endorsements.len() < required {
            warn!(
                tx_id = %set.tx_id,
                received = set.endorsements.len(),
                required,
                "endorsement quorum not met"
            );
            return Err(WranglerError::NoEndorsement {
                required,
                received: set.endorsements.len(),
                failures: set.failures,
            });
        }
        Ok(set)
    }

    /// Gather, then require every endorsement to carry the same read/write-set
    /// digest. Peers that failed are excluded from the comparison.
    pub async fn collect(
        &self,
        client: &ClientHandle,
        peers: &[Endpoint],
        proposal: &SignedProposal,
    ) -> Result<EndorsementSet, WranglerError> {
        let set = self.gather(client, peers, proposal).await?;
        if set.agreed_digest().is_none() {
            let digests: BTreeMap<String, String> = set
                .endorsements
                .iter()
                .map(|e| (e.peer.clone(), e.rwset_digest.clone()))
                .collect();
            let distinct: BTreeSet<&String> = digests.values().collect();
            warn!(
                tx_id = %set.tx_id,
                distinct = distinct.len(),
                "endorsement digests disagree"
            );
            return Err(WranglerError::EndorsementMismatch { digests });
        }

        info!(
            tx_id = %set.tx_id,
            endorsed = set.endorsements.len(),
            failed = set.failures.len(),
            "endorsements collected"
        );
        Ok(set)
    }

    async fn request_endorsement(
        &self,
        client: &ClientHandle,
        endpoint: &Endpoint,
        proposal: &SignedProposal,
    ) -> PeerOutcome {
        let peer = match client.transport().peer(endpoint) {
            Ok(peer) => peer,
            Err(err) => return self.failed(proposal, endpoint, err),
        };

        let response =
            match tokio::time::timeout(self.request_timeout, peer.process_proposal(proposal)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => return self.failed(proposal, endpoint, err),
                Err(_) => {
                    let err = TransportError::Timeout {
                        endpoint: endpoint.url.clone(),
                        millis: self.request_timeout.as_millis() as u64,
                    };
                    return self.failed(proposal, endpoint, err);
                }
            };

        if !response.is_success() {
            let reason = format!(
                "peer returned status {}: {}",
                response.status, response.message
            );
            return self.failed(proposal, endpoint, reason);
        }

        let endorsement = Endorsement::from_response(&endpoint.url, response);
        debug!(
            tx_id = %proposal.tx_id(),
            peer = %endpoint.url,
            digest = %endorsement.rwset_digest,
            "peer endorsed proposal"
        );
        PeerOutcome::Endorsed(endorsement)
    }

    fn failed(
        &self,
        proposal: &SignedProposal,
        endpoint: &Endpoint,
        reason: impl ToString,
    ) -> PeerOutcome {
        let failure = PeerFailure::new(&endpoint.url, reason);
        warn!(
            tx_id = %proposal.tx_id(),
            peer = %failure.peer,
            error = %failure.error,
            "peer did not endorse proposal"
        );
        PeerOutcome::Failed(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{ProposalAction, ProposalBuilder};
    use crate::testing::{PeerScript, ScriptedTransport};
    use proptest::prelude::*;

    const P0: &str = "grpc://peer0:7051";
    const P1: &str = "grpc://peer1:7051";
    const P2: &str = "grpc://peer2:7051";

    fn collector(min: usize) -> EndorsementCollector {
        EndorsementCollector::new(Duration::from_secs(3), EndorsementPolicy::at_least(min))
    }

    fn proposal(ctx: &crate::identity::IdentityContext) -> SignedProposal {
        ProposalBuilder::new(ProposalAction::Invoke, "mychannel")
            .chaincode("dfn", "v0")
            .function("create_project")
            .args(["{}"])
            .build(&ctx.identity)
            .unwrap()
    }

    fn peers(urls: &[&str]) -> Vec<Endpoint> {
        urls.iter().map(|u| Endpoint::new(*u)).collect()
    }

    #[tokio::test]
    async fn agreeing_peers_produce_ordered_set() {
        let (ctx, counters) = ScriptedTransport::default()
            .with_peer(P0, PeerScript::ok("created", "rw"))
            .with_peer(P1, PeerScript::ok("created", "rw"))
            .into_context(&[]);
        let signed = proposal(&ctx);

        let set = collector(1)
            .collect(&ctx.context.client, &peers(&[P1, P0]), &signed)
            .await
            .unwrap();
        assert_eq!(set.endorsements.len(), 2);
        assert_eq!(set.endorsements[0].peer, P1);
        assert!(set.agreed_digest().is_some());
        assert_eq!(set.peer_payloads()[1].text(), "created");
        assert_eq!(counters.proposals.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn partial_failure_is_reported_not_fatal() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(P0, PeerScript::ok("created", "rw"))
            .into_context(&[]);
        let signed = proposal(&ctx);

        let set = collector(1)
            .collect(&ctx.context.client, &peers(&[P0, P1]), &signed)
            .await
            .unwrap();
        assert_eq!(set.endorsements.len(), 1);
        assert_eq!(set.failures.len(), 1);
        assert_eq!(set.failures[0].peer, P1);
    }

    #[tokio::test]
    async fn zero_endorsements_fail() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(
                P0,
                PeerScript::Respond {
                    status: 500,
                    payload: vec![],
                    results: vec![],
                },
            )
            .into_context(&[]);
        let signed = proposal(&ctx);

        let err = collector(1)
            .collect(&ctx.context.client, &peers(&[P0, P1]), &signed)
            .await
            .unwrap_err();
        match err {
            WranglerError::NoEndorsement {
                required,
                received,
                failures,
            } => {
                assert_eq!(required, 1);
                assert_eq!(received, 0);
                assert_eq!(failures.len(), 2);
                assert!(failures[0].error.contains("status 500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn configurable_minimum_counts_only_responders() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(P0, PeerScript::ok("created", "rw"))
            .with_peer(P1, PeerScript::ok("created", "rw"))
            .into_context(&[]);
        let signed = proposal(&ctx);

        let err = collector(3)
            .collect(&ctx.context.client, &peers(&[P0, P1, P2]), &signed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WranglerError::NoEndorsement {
                required: 3,
                received: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn digest_disagreement_is_a_mismatch() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(P0, PeerScript::ok("created", "rw-a"))
            .with_peer(P1, PeerScript::ok("created", "rw-b"))
            .into_context(&[]);
        let signed = proposal(&ctx);

        let err = collector(1)
            .collect(&ctx.context.client, &peers(&[P0, P1]), &signed)
            .await
            .unwrap_err();
        match err {
            WranglerError::EndorsementMismatch { digests } => {
                assert_eq!(digests.len(), 2);
                assert_ne!(digests[P0], digests[P1]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn gather_skips_digest_check() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(P0, PeerScript::ok("a", "rw-a"))
            .with_peer(P1, PeerScript::ok("b", "rw-b"))
            .into_context(&[]);
        let signed = proposal(&ctx);

        let set = collector(1)
            .gather(&ctx.context.client, &peers(&[P0, P1]), &signed)
            .await
            .unwrap();
        assert_eq!(set.endorsements.len(), 2);
        assert!(set.agreed_digest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_peer_is_bounded_by_request_timeout() {
        let (ctx, _) = ScriptedTransport::default()
            .with_peer(P0, PeerScript::ok("created", "rw"))
            .with_peer(P1, PeerScript::Hang)
            .into_context(&[]);
        let signed = proposal(&ctx);

        let started = tokio::time::Instant::now();
        let outcomes = collector(1)
            .dispatch(&ctx.context.client, &peers(&[P0, P1]), &signed)
            .await;
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(matches!(outcomes[0], PeerOutcome::Endorsed(_)));
        match &outcomes[1] {
            PeerOutcome::Failed(failure) => assert!(failure.error.contains("timed out")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn fan_out_accounts_for_every_peer_once(script in proptest::collection::vec(0u8..3, 1..8)) {
            let urls: Vec<String> = (0..script.len())
                .map(|i| format!("grpc://peer{i}:7051"))
                .collect();
            let mut transport = ScriptedTransport::default();
            for (url, kind) in urls.iter().zip(&script) {
                transport = match kind {
                    0 => transport.with_peer(url, PeerScript::ok("ok", "rw")),
                    1 => transport.with_peer(
                        url,
                        PeerScript::Fail(TransportError::Unreachable(url.clone())),
                    ),
                    _ => transport,
                };
            }
            let (ctx, _) = transport.into_context(&[]);
            let endpoints: Vec<Endpoint> = urls.iter().map(Endpoint::new).collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let outcomes = runtime.block_on(async {
                let signed = proposal(&ctx);
                collector(1).dispatch(&ctx.context.client, &endpoints, &signed).await
            });

            prop_assert_eq!(outcomes.len(), urls.len());
            let endorsed = outcomes
                .iter()
                .filter(|o| matches!(o, PeerOutcome::Endorsed(_)))
                .count();
            prop_assert!(endorsed <= urls.len());
            prop_assert_eq!(endorsed, script.iter().filter(|k| **k == 0).count());
            let seen: BTreeSet<&str> = outcomes.iter().map(PeerOutcome::peer).collect();
            prop_assert_eq!(seen.len(), urls.len());
        }
    }
}
