use async_trait::async_trait;
use fabric_wrangler_core::{
    BlockEvent, ChaincodeEvent, EventConnection, EventFilter, EventSource, LedgerEvent,
    TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Injected event hub misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubFault {
    /// Accepts subscriptions but never delivers anything.
    Silent,
    /// Closes every stream right after registration.
    DropAfterRegister,
    /// Delivers every matching event twice.
    Duplicate,
    /// Refuses connections.
    Unreachable,
}

struct Subscription {
    id: Uuid,
    /// `None` until the client registers a filter.
    filter: Option<EventFilter>,
    sender: mpsc::Sender<LedgerEvent>,
}

/// One peer's event endpoint. Fans committed blocks out to registered
/// subscriptions.
pub struct EventHub {
    url: String,
    subscriptions: Mutex<Vec<Subscription>>,
    fault: Mutex<Option<HubFault>>,
    connects: AtomicUsize,
}

impl EventHub {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscriptions: Mutex::new(Vec::new()),
            fault: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_fault(&self, fault: Option<HubFault>) {
        *lock(&self.fault) = fault;
    }

    fn fault(&self) -> Option<HubFault> {
        lock(&self.fault).clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> (Uuid, mpsc::Receiver<LedgerEvent>) {
        let (sender, receiver) = mpsc::channel(256);
        let id = Uuid::new_v4();
        lock(&self.subscriptions).push(Subscription {
            id,
            filter: None,
            sender,
        });
        debug!(hub = %self.url, subscription_id = %id, "subscription opened");
        (id, receiver)
    }

    fn register(&self, id: Uuid, filter: &EventFilter) -> bool {
        let mut subs = lock(&self.subscriptions);
        match subs.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.filter = Some(filter.clone());
                true
            }
            None => false,
        }
    }

    fn unsubscribe(&self, id: Uuid) {
        let mut subs = lock(&self.subscriptions);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        if subs.len() != before {
            debug!(hub = %self.url, subscription_id = %id, "subscription removed");
        }
    }

    /// Delivers a committed block, then its chaincode events, to every
    /// matching subscription. Returns the number of deliveries.
    pub fn publish(&self, block: &BlockEvent, events: &[ChaincodeEvent]) -> usize {
        let fault = self.fault();
        if fault == Some(HubFault::Silent) {
            return 0;
        }
        let copies = if fault == Some(HubFault::Duplicate) { 2 } else { 1 };

        let mut outgoing = vec![LedgerEvent::Block(block.clone())];
        outgoing.extend(events.iter().cloned().map(LedgerEvent::Chaincode));

        let mut subs = lock(&self.subscriptions);
        let mut delivered = 0;
        let mut closed = Vec::new();
        for sub in subs.iter() {
            let Some(filter) = &sub.filter else {
                continue;
            };
            for event in outgoing.iter().filter(|e| filter.matches(e)) {
                for _ in 0..copies {
                    match sub.sender.try_send(event.clone()) {
                        Ok(()) => delivered += 1,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(
                                hub = %self.url,
                                subscription_id = %sub.id,
                                "subscriber channel full, dropping event"
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.id),
                    }
                }
            }
        }
        if !closed.is_empty() {
            subs.retain(|s| !closed.contains(&s.id));
            debug!(hub = %self.url, removed = closed.len(), "cleaned up closed subscriptions");
        }
        delivered
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Client-side handle for an [`EventHub`].
pub struct SandboxEventSource {
    hub: Arc<EventHub>,
}

impl SandboxEventSource {
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl EventSource for SandboxEventSource {
    async fn connect(&self) -> Result<Box<dyn EventConnection>, TransportError> {
        self.hub.connects.fetch_add(1, Ordering::SeqCst);
        if self.hub.fault() == Some(HubFault::Unreachable) {
            return Err(TransportError::Unreachable(self.hub.url.clone()));
        }
        let (id, receiver) = self.hub.subscribe();
        Ok(Box::new(HubConnection {
            hub: self.hub.clone(),
            id,
            receiver,
            closed: false,
        }))
    }
}

struct HubConnection {
    hub: Arc<EventHub>,
    id: Uuid,
    receiver: mpsc::Receiver<LedgerEvent>,
    closed: bool,
}

#[async_trait]
impl EventConnection for HubConnection {
    async fn register(&mut self, filter: &EventFilter) -> Result<(), TransportError> {
        if !self.hub.register(self.id, filter) {
            return Err(TransportError::Closed(self.hub.url.clone()));
        }
        if self.hub.fault() == Some(HubFault::DropAfterRegister) {
            self.closed = true;
            self.hub.unsubscribe(self.id);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<LedgerEvent, TransportError>> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await.map(Ok)
    }

    async fn disconnect(&mut self) {
        self.closed = true;
        self.receiver.close();
        self.hub.unsubscribe(self.id);
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
