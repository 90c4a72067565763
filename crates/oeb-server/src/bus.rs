// SPDX-License-Identifier: MIT OR Apache-2.0
//! Broadcast-based fan-out of [`Envelope`]s to WebSocket subscribers.
//!
//! A single broadcast channel carries every accepted envelope; each
//! subscriber wraps it in a predicate so it is attached to exactly one
//! logical topic (`events.all` or `events.<type>`) without the server
//! maintaining a channel per type.

use oeb_core::Envelope;
use tokio::sync::broadcast;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Shared publish point for accepted envelopes.
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// Create a bus with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish `envelope` to every current subscriber. Silently dropped if
    /// nobody is listening.
    pub fn publish(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    /// Subscribe with an optional `type` filter. `None` subscribes to
    /// `events.all`; `Some(t)` subscribes to `events.<t>` only.
    pub fn subscribe(&self, type_filter: Option<String>) -> FilteredSubscription {
        FilteredSubscription {
            rx: self.tx.subscribe(),
            type_filter,
        }
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus: the raw broadcast receiver plus the
/// topic it is attached to.
pub struct FilteredSubscription {
    rx: broadcast::Receiver<Envelope>,
    type_filter: Option<String>,
}

impl FilteredSubscription {
    /// Receive the next envelope matching this subscription's topic,
    /// skipping lag gaps and non-matching envelopes. Returns `None` only
    /// when the bus itself has been dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if self.matches(&envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, envelope: &Envelope) -> bool {
        match &self.type_filter {
            Some(t) => &envelope.event_type == t,
            None => true,
        }
    }
}
