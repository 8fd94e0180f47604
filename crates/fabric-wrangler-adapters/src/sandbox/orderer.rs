use super::event_hub::EventHub;
use super::ledger::Ledger;
use async_trait::async_trait;
use fabric_wrangler_core::{
    BroadcastResponse, BroadcastStatus, OrderingService, TransactionEnvelope, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Injected ordering-node misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrdererFault {
    Reject(BroadcastStatus),
    Unreachable,
}

/// Simulated ordering node. Every accepted envelope is cut into its own
/// block after `block_interval` and published to every event hub.
pub struct SandboxOrderer {
    url: String,
    block_interval: Duration,
    ledger: Arc<Mutex<Ledger>>,
    hubs: Arc<Vec<Arc<EventHub>>>,
    fault: Mutex<Option<OrdererFault>>,
    broadcasts: Arc<AtomicUsize>,
}

impl SandboxOrderer {
    pub(crate) fn new(
        url: impl Into<String>,
        block_interval: Duration,
        ledger: Arc<Mutex<Ledger>>,
        hubs: Arc<Vec<Arc<EventHub>>>,
        broadcasts: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            url: url.into(),
            block_interval,
            ledger,
            hubs,
            fault: Mutex::new(None),
            broadcasts,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_fault(&self, fault: Option<OrdererFault>) {
        *lock(&self.fault) = fault;
    }

    fn response(status: BroadcastStatus, info: impl Into<String>) -> BroadcastResponse {
        BroadcastResponse {
            status,
            info: info.into(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl OrderingService for SandboxOrderer {
    async fn broadcast(
        &self,
        envelope: &TransactionEnvelope,
    ) -> Result<BroadcastResponse, TransportError> {
        let fault = lock(&self.fault).clone();
        match fault {
            Some(OrdererFault::Unreachable) => {
                return Err(TransportError::Unreachable(self.url.clone()));
            }
            Some(OrdererFault::Reject(status)) => {
                self.broadcasts.fetch_add(1, Ordering::SeqCst);
                warn!(
                    orderer = %self.url,
                    tx_id = %envelope.tx_id,
                    status = %status,
                    "injected rejection"
                );
                return Ok(Self::response(status, "rejected by fault injection"));
            }
            None => {}
        }
        self.broadcasts.fetch_add(1, Ordering::SeqCst);

        if envelope.endorsements.is_empty() {
            return Ok(Self::response(
                BroadcastStatus::BadRequest,
                "envelope carries no endorsements",
            ));
        }
        let digest =
            TransactionEnvelope::signing_digest(&envelope.proposal, &envelope.endorsements);
        if !envelope.proposal.proposal.creator.verify(&digest, &envelope.signature) {
            return Ok(Self::response(
                BroadcastStatus::Forbidden,
                "envelope signature does not match creator",
            ));
        }

        let envelope = envelope.clone();
        let ledger = self.ledger.clone();
        let hubs = self.hubs.clone();
        let interval = self.block_interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let (block, events) = lock(&ledger).commit_block(std::slice::from_ref(&envelope));
            let delivered: usize = hubs.iter().map(|hub| hub.publish(&block, &events)).sum();
            debug!(
                block_number = block.block_number,
                delivered,
                "block published to event hubs"
            );
        });

        Ok(Self::response(BroadcastStatus::Success, ""))
    }
}
