//! Listener event system.

use crate::confirmed::EventKey;
use crate::listener::ListenerState;
use crate::reconciler::ReconcileStatus;
use tokio::sync::broadcast;

/// Events emitted by the reconciliation listener.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// The listener moved to a new state.
    StateChanged {
        /// New state.
        state: ListenerState,
    },

    /// A confirmed event was delivered to the reconciler.
    Relayed {
        /// Idempotency key of the event.
        key: EventKey,
        /// How the reconciler handled it.
        status: ReconcileStatus,
    },

    /// A confirmed event could not be delivered.
    RelayFailed {
        /// Idempotency key of the event.
        key: EventKey,
        /// Failure description.
        message: String,
    },

    /// A ledger log could not be interpreted and was skipped.
    Discarded {
        /// Reason.
        reason: String,
    },
}

/// Channel for receiving listener events.
pub type ListenerEventsChannel = broadcast::Receiver<ListenerEvent>;

/// Sender for listener events.
pub type ListenerEventsSender = broadcast::Sender<ListenerEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (ListenerEventsSender, ListenerEventsChannel) {
    broadcast::channel(256)
}
