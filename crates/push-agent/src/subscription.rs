//! Subscribe and unsubscribe.
//!
//! While connected, a subscribe sends a `register` and parks the request
//! until the server answers. While offline, it is resolved against the store
//! alone: the first `available` channel is reused, otherwise a `new` one is
//! queued. Queued channels are never registered automatically; a later
//! subscribe naming them is needed once connected.

use simplepush_core::{
    generate_channel_id, ChannelId, ChannelQuery, ChannelRecord, ChannelState, HandlerError,
    NotificationDispatcher, NotificationHandler,
};
use simplepush_protocol::{ClientMessage, Update};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::client::{guarded, SimplePush};
use crate::error::PushError;
use crate::metrics;

/// Called with the channel record once a subscription succeeds.
pub type SuccessCallback = Box<dyn FnOnce(&ChannelRecord) + Send>;

/// Called if the server rejects the subscription.
pub type ErrorCallback = Box<dyn FnOnce(&PushError) + Send>;

/// One channel subscription.
#[derive(Default)]
pub struct SubscribeRequest {
    channel_id: Option<ChannelId>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_notification: Option<NotificationHandler>,
}

impl SubscribeRequest {
    /// Create an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register this channel ID instead of a generated one.
    ///
    /// Only used while connected.
    #[must_use]
    pub fn with_channel_id(mut self, channel_id: impl Into<ChannelId>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Run `callback` with the channel record on success.
    #[must_use]
    pub fn on_success(mut self, callback: impl FnOnce(&ChannelRecord) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Run `callback` if the server rejects the registration.
    #[must_use]
    pub fn on_error(mut self, callback: impl FnOnce(&PushError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Receive the channel's notification updates.
    #[must_use]
    pub fn on_notification(
        mut self,
        handler: impl Fn(&Update) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> Self {
        self.on_notification = Some(Arc::new(handler));
        self
    }

    fn into_pending(self) -> PendingRequest {
        PendingRequest {
            on_success: self.on_success,
            on_error: self.on_error,
            on_notification: self.on_notification,
        }
    }
}

impl std::fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("channel_id", &self.channel_id)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_notification", &self.on_notification.is_some())
            .finish()
    }
}

/// A request waiting for its success or failure.
pub(crate) struct PendingRequest {
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_notification: Option<NotificationHandler>,
}

impl PendingRequest {
    /// Bind the notification handler to `record` and run `on_success`.
    pub(crate) fn succeed(self, record: &ChannelRecord, dispatcher: &NotificationDispatcher) {
        if let Some(handler) = self.on_notification {
            dispatcher.bind(record.channel_id.clone(), handler);
        }
        if let Some(callback) = self.on_success {
            guarded("on_success", || callback(record));
        }
    }

    pub(crate) fn fail(self, error: &PushError) {
        if let Some(callback) = self.on_error {
            guarded("on_error", || callback(error));
        }
    }
}

/// Requests keyed by binding id.
///
/// A request registered under a caller-chosen channel ID is keyed by its
/// local binding id, with the wire ID aliased to it, so a reply naming
/// either resolves it. Taking a request removes it.
#[derive(Default)]
pub(crate) struct PendingRequests {
    by_binding: HashMap<ChannelId, Vec<PendingRequest>>,
    aliases: HashMap<ChannelId, Vec<ChannelId>>,
}

impl PendingRequests {
    pub(crate) fn insert(&mut self, binding_id: ChannelId, request: PendingRequest) {
        self.by_binding.entry(binding_id).or_default().push(request);
    }

    pub(crate) fn alias(&mut self, wire_id: ChannelId, binding_id: ChannelId) {
        self.aliases.entry(wire_id).or_default().push(binding_id);
    }

    /// Remove every request resolved by a reply for `channel_id`.
    pub(crate) fn take(&mut self, channel_id: &str) -> Vec<PendingRequest> {
        let mut taken = self.by_binding.remove(channel_id).unwrap_or_default();
        for binding_id in self.aliases.remove(channel_id).unwrap_or_default() {
            taken.extend(self.by_binding.remove(&binding_id).unwrap_or_default());
        }
        taken
    }

    pub(crate) fn len(&self) -> usize {
        self.by_binding.values().map(Vec::len).sum()
    }
}

impl SimplePush {
    /// Subscribe channels.
    ///
    /// With `reset`, every stored channel is unsubscribed first. Returns the
    /// binding id of each request: a fresh local id while connected, or the
    /// reused or queued channel ID while offline.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if `reset` is set while offline, or an error if
    /// the store cannot be saved or a message cannot be queued.
    pub fn subscribe(
        &self,
        requests: impl IntoIterator<Item = SubscribeRequest>,
        reset: bool,
    ) -> Result<Vec<ChannelId>, PushError> {
        if reset {
            let tracked: Vec<ChannelId> =
                self.channels().into_iter().map(|r| r.channel_id).collect();
            self.unsubscribe(tracked)?;
        }

        let mut session = self.inner.session.lock();
        let mut bindings = Vec::new();

        for request in requests {
            if session.is_open() {
                let local_id = generate_channel_id();
                let wire_id = request
                    .channel_id
                    .clone()
                    .unwrap_or_else(|| local_id.clone());

                session.send(&ClientMessage::register(wire_id.as_str()))?;
                if wire_id != local_id {
                    session.pending.alias(wire_id, local_id.clone());
                }
                session.pending.insert(local_id.clone(), request.into_pending());
                bindings.push(local_id);
                continue;
            }

            let available = session
                .store
                .position_by(ChannelQuery::State(ChannelState::Available));
            let channel_id = match available {
                Some(index) => {
                    let reused = ChannelRecord {
                        state: ChannelState::Used,
                        registered: true,
                        ..session.store.channels()[index].clone()
                    };
                    let channel_id = reused.channel_id.clone();
                    session.store.replace_at(index, reused)?;
                    debug!(channel = %channel_id, "Reused available channel");
                    channel_id
                }
                None => {
                    let channel_id = generate_channel_id();
                    session.store.insert(ChannelRecord::queued(channel_id.as_str()))?;
                    debug!(channel = %channel_id, "Queued new channel");
                    channel_id
                }
            };

            let pending = request.into_pending();
            if let Some(handler) = &pending.on_notification {
                self.inner
                    .dispatcher
                    .bind(channel_id.clone(), Arc::clone(handler));
            }
            session.pending.insert(channel_id.clone(), pending);
            bindings.push(channel_id);
        }

        metrics::set_channels_stored(session.store.len());
        debug!(
            requests = bindings.len(),
            pending = session.pending.len(),
            "Subscribed"
        );
        Ok(bindings)
    }

    /// Send an `unregister` for each channel.
    ///
    /// Does not wait for replies; a record leaves the store when its
    /// unregister is confirmed.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the transport is not open.
    pub fn unsubscribe<I, S>(&self, channel_ids: I) -> Result<(), PushError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let session = self.inner.session.lock();
        if !session.is_open() {
            return Err(PushError::NotConnected);
        }
        for channel_id in channel_ids {
            session.send(&ClientMessage::unregister(channel_id.as_ref()))?;
        }
        Ok(())
    }
}
