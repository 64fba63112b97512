//! Agent event system.

use tokio::sync::broadcast;

/// Events emitted by the agent.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Agent has started its background tasks.
    Started,

    /// Agent is shutting down.
    ShuttingDown,

    /// A caller was refused by the rate limiter.
    RateLimited {
        /// Caller key (usually the client IP).
        key: String,
    },

    /// The facilitator accepted an inbound payment.
    PaymentVerified {
        /// Payer address.
        payer: String,
        /// Amount in smallest units.
        amount: String,
    },

    /// An inbound payment was rejected before the route ran.
    PaymentRejected {
        /// Rejection reason.
        reason: String,
    },

    /// A verified payment was settled after the route ran.
    PaymentSettled {
        /// Settlement transaction hash, if reported.
        transaction: Option<String>,
    },

    /// Registry discovery completed.
    PeersDiscovered {
        /// Number of readable entries found.
        count: usize,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving agent events.
pub type AgentEventsChannel = broadcast::Receiver<AgentEvent>;

/// Sender for agent events.
pub type AgentEventsSender = broadcast::Sender<AgentEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (AgentEventsSender, AgentEventsChannel) {
    broadcast::channel(256)
}
