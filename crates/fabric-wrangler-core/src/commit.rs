use crate::error::WranglerError;
use crate::identity::ClientHandle;
use crate::transport::{EventConnection, EventSource};
use crate::types::{ChaincodeEvent, Endpoint, EventFilter, LedgerEvent, ValidationCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stand-in deadline for block delays too large to add to the clock.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Connected,
    Waiting,
    ResolvedSuccess,
    ResolvedFailure,
    TimedOut,
    Disconnected,
}

impl SubscriptionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Waiting => "waiting_for_event",
            Self::ResolvedSuccess => "resolved_success",
            Self::ResolvedFailure => "resolved_failure",
            Self::TimedOut => "timed_out",
            Self::Disconnected => "disconnected_error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ResolvedSuccess | Self::ResolvedFailure | Self::TimedOut | Self::Disconnected
        )
    }
}

/// Terminal outcome of one commit wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Committed { block_number: u64 },
    Rejected {
        block_number: u64,
        validation_code: ValidationCode,
    },
    ChaincodeEvent(ChaincodeEvent),
    TimedOut,
}

/// One live event stream, scoped to a single filter and owned by a single
/// wait. The connection is released exactly once, on whichever terminal
/// state is reached first.
pub struct EventSubscription {
    endpoint: String,
    filter: EventFilter,
    state: SubscriptionState,
    connection: Option<Box<dyn EventConnection>>,
}

impl EventSubscription {
    pub fn new(endpoint: impl Into<String>, filter: EventFilter) -> Self {
        Self {
            endpoint: endpoint.into(),
            filter,
            state: SubscriptionState::Idle,
            connection: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    fn transition(&mut self, next: SubscriptionState) -> Result<(), WranglerError> {
        use SubscriptionState::*;
        let allowed = matches!(
            (self.state, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connected, Waiting)
                | (Waiting, ResolvedSuccess)
                | (Waiting, ResolvedFailure)
                | (Waiting, TimedOut)
                | (Idle | Connecting | Connected | Waiting, Disconnected)
        );

        if !allowed {
            return Err(WranglerError::InvariantViolation(format!(
                "subscription state transition not allowed: {} -> {}",
                self.state.name(),
                next.name()
            )));
        }

        debug!(
            endpoint = %self.endpoint,
            filter = %self.filter.describe(),
            from = self.state.name(),
            to = next.name(),
            "subscription state changed"
        );
        self.state = next;
        Ok(())
    }

    /// Connects and registers the filter: `idle -> connecting -> connected ->
    /// waiting_for_event`. Any failure ends in `disconnected_error`.
    pub async fn open(
        &mut self,
        source: Arc<dyn EventSource>,
        connect_timeout: Duration,
    ) -> Result<(), WranglerError> {
        self.transition(SubscriptionState::Connecting)?;
        let connection = match tokio::time::timeout(connect_timeout, source.connect()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => return self.lose(err).await,
            Err(_) => {
                let reason = format!("connect timed out after {}ms", connect_timeout.as_millis());
                return self.lose(reason).await;
            }
        };
        self.connection = Some(connection);
        self.transition(SubscriptionState::Connected)?;

        let filter = self.filter.clone();
        let registered = match self.connection.as_mut() {
            Some(connection) => connection.register(&filter).await,
            None => return self.lose("connection missing after connect").await,
        };
        if let Err(err) = registered {
            return self.lose(err).await;
        }
        self.transition(SubscriptionState::Waiting)
    }

    /// Waits for the first correlated event or the deadline, whichever comes
    /// first. Uncorrelated events are skipped; nothing is read after the
    /// subscription resolves.
    pub async fn wait(&mut self, deadline: Instant) -> Result<Confirmation, WranglerError> {
        if self.state != SubscriptionState::Waiting {
            return Err(WranglerError::stage_violation(
                SubscriptionState::Waiting.name(),
                self.state.name(),
            ));
        }

        loop {
            let Some(connection) = self.connection.as_mut() else {
                return self.lose("connection missing while waiting").await;
            };
            let event = match tokio::time::timeout_at(deadline, connection.next_event()).await {
                Err(_) => {
                    self.resolve(SubscriptionState::TimedOut).await?;
                    return Ok(Confirmation::TimedOut);
                }
                Ok(None) => return self.lose("event stream closed").await,
                Ok(Some(Err(err))) => return self.lose(err).await,
                Ok(Some(Ok(event))) => event,
            };

            if !self.filter.matches(&event) {
                debug!(
                    endpoint = %self.endpoint,
                    filter = %self.filter.describe(),
                    "skipping uncorrelated event"
                );
                continue;
            }

            let confirmation = self.classify(event);
            let terminal = match confirmation {
                Confirmation::Rejected { .. } => SubscriptionState::ResolvedFailure,
                _ => SubscriptionState::ResolvedSuccess,
            };
            self.resolve(terminal).await?;
            return Ok(confirmation);
        }
    }

    fn classify(&self, event: LedgerEvent) -> Confirmation {
        match (&self.filter, event) {
            (EventFilter::Transaction { tx_id }, LedgerEvent::Block(block)) => {
                match block.validation_for(tx_id) {
                    Some(code) if !code.is_valid() => Confirmation::Rejected {
                        block_number: block.block_number,
                        validation_code: code,
                    },
                    _ => Confirmation::Committed {
                        block_number: block.block_number,
                    },
                }
            }
            (_, LedgerEvent::Chaincode(event)) => Confirmation::ChaincodeEvent(event),
            (_, LedgerEvent::Block(block)) => Confirmation::Committed {
                block_number: block.block_number,
            },
        }
    }

    async fn resolve(&mut self, terminal: SubscriptionState) -> Result<(), WranglerError> {
        self.transition(terminal)?;
        self.release().await;
        Ok(())
    }

    async fn lose<T>(&mut self, reason: impl ToString) -> Result<T, WranglerError> {
        let reason = reason.to_string();
        warn!(
            endpoint = %self.endpoint,
            filter = %self.filter.describe(),
            reason = %reason,
            "event connection lost"
        );
        self.transition(SubscriptionState::Disconnected)?;
        self.release().await;
        Err(WranglerError::connection_lost(&self.endpoint, reason))
    }

    async fn release(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect().await;
        }
        info!(
            endpoint = %self.endpoint,
            filter = %self.filter.describe(),
            state = self.state.name(),
            "event subscription released"
        );
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        // A wait cancelled mid-flight still owns a live connection.
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        warn!(
            endpoint = %self.endpoint,
            filter = %self.filter.describe(),
            state = self.state.name(),
            "event subscription dropped before resolution"
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { connection.disconnect().await });
        }
    }
}

/// The event wrangler: turns an unbounded asynchronous commit into a wait
/// bounded by the block delay.
#[derive(Debug, Clone)]
pub struct CommitConfirmer {
    connect_timeout: Duration,
}

impl CommitConfirmer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Subscribes to `endpoint` for `filter` and resolves exactly once.
    pub async fn confirm(
        &self,
        client: &ClientHandle,
        endpoint: &Endpoint,
        filter: EventFilter,
        block_delay: Duration,
    ) -> Result<Confirmation, WranglerError> {
        self.subscribe(client, endpoint, filter, block_delay)
            .await?
            .wait()
            .await
    }

    /// Connects and registers `filter`, returning once the peer will deliver
    /// matching events. The block delay is counted from that moment.
    pub async fn subscribe(
        &self,
        client: &ClientHandle,
        endpoint: &Endpoint,
        filter: EventFilter,
        block_delay: Duration,
    ) -> Result<PendingConfirmation, WranglerError> {
        let source = client
            .transport()
            .event_source(endpoint)
            .map_err(|err| WranglerError::connection_lost(&endpoint.url, err))?;

        let mut subscription = EventSubscription::new(&endpoint.url, filter);
        subscription.open(source, self.connect_timeout).await?;

        debug!(
            endpoint = %endpoint.url,
            filter = %subscription.filter().describe(),
            block_delay_ms = block_delay.as_millis() as u64,
            "waiting for event"
        );
        Ok(PendingConfirmation {
            subscription,
            deadline: deadline_after(block_delay),
        })
    }
}

/// A registered subscription whose wait has not started. Dropping it
/// releases the connection.
pub struct PendingConfirmation {
    subscription: EventSubscription,
    deadline: Instant,
}

impl PendingConfirmation {
    pub fn filter(&self) -> &EventFilter {
        self.subscription.filter()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub async fn wait(mut self) -> Result<Confirmation, WranglerError> {
        self.subscription.wait(self.deadline).await
    }
}

fn deadline_after(block_delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(block_delay)
        .unwrap_or_else(|| now + UNBOUNDED_WAIT)
}
