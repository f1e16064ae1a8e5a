//! Reconciliation listener.
//!
//! Subscribes to the resolver contracts, turns each confirmed log into a flat
//! payload and relays it to the reconciler.
//!
//! ```text
//!   Disconnected ──start──► Connecting ──subscribed──► Subscribed
//!        ▲                      │                          │
//!        │                   failure                 socket lost
//!        │                      ▼                          │
//!        └──── fixed delay ◄── Disconnected ◄──────────────┘
//! ```
//!
//! Exactly one run task exists per listener; it owns the connection, so
//! reconnects cannot overlap and stopping the task releases the socket.

mod normalize;
mod relay;
mod transport;

pub use normalize::normalize;
pub use relay::{EventRelay, HttpRelay};
pub use transport::{
    EventTransport, LedgerLog, LogStream, PhotoPurchased, PhotoRegistered, PhotoRemovedFromSale,
    ReceiptSummary, WsTransport,
};

use crate::event::{create_event_channel, ListenerEvent, ListenerEventsChannel, ListenerEventsSender};
use futures::StreamExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No connection.
    Disconnected,
    /// Opening the connection and subscription.
    Connecting,
    /// Receiving resolver logs.
    Subscribed,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
        })
    }
}

struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owned, restartable listener client.
pub struct ReconciliationListener {
    ctx: Arc<LoopContext>,
    run: Mutex<Option<RunHandle>>,
}

struct LoopContext {
    transport: Arc<dyn EventTransport>,
    relay: Arc<dyn EventRelay>,
    reconnect_delay: Duration,
    state_tx: watch::Sender<ListenerState>,
    events_tx: ListenerEventsSender,
}

impl ReconciliationListener {
    /// Create a stopped listener.
    #[must_use]
    pub fn new(
        transport: Arc<dyn EventTransport>,
        relay: Arc<dyn EventRelay>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ListenerState::Disconnected);
        let (events_tx, _) = create_event_channel();
        Self {
            ctx: Arc::new(LoopContext {
                transport,
                relay,
                reconnect_delay,
                state_tx,
                events_tx,
            }),
            run: Mutex::new(None),
        }
    }

    /// Start the run task. Returns `false` if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            debug!("Listener already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::clone(&self.ctx);
        let task = tokio::spawn(async move { ctx.run(shutdown_rx).await });
        *run = Some(RunHandle { shutdown_tx, task });
        info!("Reconciliation listener started");
        true
    }

    /// Stop the run task and release the connection.
    pub async fn stop(&self) {
        let handle = self.run.lock().take();
        let Some(handle) = handle else {
            return;
        };
        let _ = handle.shutdown_tx.send(true);
        if let Err(e) = handle.task.await {
            error!("Listener task ended abnormally: {e}");
        }
        self.ctx.set_state(ListenerState::Disconnected);
        info!("Reconciliation listener stopped");
    }

    /// Current connection state.
    #[must_use]
    pub fn current_state(&self) -> ListenerState {
        *self.ctx.state_tx.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.ctx.state_tx.subscribe()
    }

    /// Subscribe to listener events.
    #[must_use]
    pub fn subscribe_events(&self) -> ListenerEventsChannel {
        self.ctx.events_tx.subscribe()
    }
}

impl LoopContext {
    fn set_state(&self, state: ListenerState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(state = %state, "Listener state changed");
            let _ = self.events_tx.send(ListenerEvent::StateChanged { state });
        }
    }

    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            self.set_state(ListenerState::Connecting);
            let subscribed = tokio::select! {
                _ = shutdown_rx.changed() => break,
                result = self.transport.subscribe() => result,
            };

            match subscribed {
                Ok(stream) => {
                    self.set_state(ListenerState::Subscribed);
                    if self.consume(stream, &mut shutdown_rx).await {
                        break;
                    }
                }
                Err(e) => warn!("Listener connection failed: {e}"),
            }

            self.set_state(ListenerState::Disconnected);
            info!(
                "Reconnecting in {}s",
                self.reconnect_delay.as_secs_f32()
            );
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        self.set_state(ListenerState::Disconnected);
    }

    /// Drain `stream` until it fails or shutdown is requested. Returns `true`
    /// on shutdown. The stream is dropped on return either way.
    async fn consume(&self, mut stream: LogStream, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        loop {
            let next = tokio::select! {
                _ = shutdown_rx.changed() => return true,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(log)) => self.forward(log).await,
                Some(Err(e)) => {
                    warn!("Listener subscription failed: {e}");
                    return false;
                }
                None => {
                    warn!("Listener subscription closed");
                    return false;
                }
            }
        }
    }

    async fn forward(&self, log: LedgerLog) {
        if let LedgerLog::Unrecognized { reason } = &log {
            warn!("Skipping resolver log: {reason}");
            let _ = self.events_tx.send(ListenerEvent::Discarded {
                reason: reason.clone(),
            });
            return;
        }
        let Some(event) = normalize(log) else {
            return;
        };

        let key = event.idempotency_key();
        match self.relay.relay(&event).await {
            Ok(status) => {
                info!(event = %key, ?status, "Relayed confirmed event");
                let _ = self.events_tx.send(ListenerEvent::Relayed { key, status });
            }
            Err(e) => {
                error!(event = %key, "Relay failed: {e}");
                let _ = self.events_tx.send(ListenerEvent::RelayFailed {
                    key,
                    message: e.to_string(),
                });
            }
        }
    }
}

impl Drop for ReconciliationListener {
    fn drop(&mut self) {
        if let Some(handle) = self.run.get_mut().take() {
            let _ = handle.shutdown_tx.send(true);
            handle.task.abort();
        }
    }
}
