//! Notification delivery.
//!
//! Each inbound update is routed to the handler bound to its channel and to
//! every generic listener. Handlers are isolated from one another: an error
//! or panic in one is logged and counted, and delivery carries on.

use crate::channel::ChannelId;
use dashmap::DashMap;
use parking_lot::RwLock;
use simplepush_protocol::Update;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Error type returned by notification handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A notification handler.
pub type NotificationHandler = Arc<dyn Fn(&Update) -> Result<(), HandlerError> + Send + Sync>;

/// Outcome of delivering one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

impl DeliveryReport {
    /// Check if no handler received the update.
    #[must_use]
    pub fn is_unhandled(&self) -> bool {
        self.delivered == 0 && self.failed == 0
    }
}

/// Routes updates to per-channel handlers and generic listeners.
#[derive(Default)]
pub struct NotificationDispatcher {
    /// Handlers indexed by channel.
    handlers: DashMap<ChannelId, NotificationHandler>,
    /// Listeners that see every update.
    listeners: RwLock<Vec<NotificationHandler>>,
}

impl NotificationDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a channel, replacing any previous one.
    pub fn bind(&self, channel_id: impl Into<ChannelId>, handler: NotificationHandler) {
        let channel_id = channel_id.into();
        debug!(channel = %channel_id, "Bound notification handler");
        self.handlers.insert(channel_id, handler);
    }

    /// Remove the handler bound to a channel.
    ///
    /// Returns `true` if a handler was bound.
    pub fn unbind(&self, channel_id: &str) -> bool {
        self.handlers.remove(channel_id).is_some()
    }

    /// Check if a channel has a handler.
    #[must_use]
    pub fn is_bound(&self, channel_id: &str) -> bool {
        self.handlers.contains_key(channel_id)
    }

    /// Add a listener that receives every update.
    pub fn add_listener(&self, listener: NotificationHandler) {
        self.listeners.write().push(listener);
    }

    /// Deliver one update.
    pub fn deliver(&self, update: &Update) -> DeliveryReport {
        // Clone out so no map shard or list lock is held while user code runs.
        let handler = self
            .handlers
            .get(&update.channel_id)
            .map(|entry| Arc::clone(entry.value()));
        let listeners: Vec<NotificationHandler> = self.listeners.read().clone();

        let mut report = DeliveryReport::default();
        for handler in handler.iter().chain(listeners.iter()) {
            if invoke(handler, update) {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.is_unhandled() {
            debug!(channel = %update.channel_id, "No handler for update");
        }
        trace!(
            channel = %update.channel_id,
            version = update.version,
            delivered = report.delivered,
            failed = report.failed,
            "Delivered update"
        );
        report
    }

    /// Deliver a batch in order.
    pub fn deliver_all(&self, updates: &[Update]) -> Vec<DeliveryReport> {
        updates.iter().map(|update| self.deliver(update)).collect()
    }
}

fn invoke(handler: &NotificationHandler, update: &Update) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler(update))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(channel = %update.channel_id, error = %e, "Notification handler failed");
            false
        }
        Err(_) => {
            warn!(channel = %update.channel_id, "Notification handler panicked");
            false
        }
    }
}
