//! The push client handle.
//!
//! One [`SimplePush`] owns one channel store and at most one live
//! connection. Every read or write of the store, the connection state, the
//! outbound queue, and the pending-request registry happens under a single
//! mutex. Caller callbacks always run after that lock is released, so they
//! are free to call back into the client.

use parking_lot::Mutex;
use serde_json::Value;
use simplepush_core::{
    ChannelQuery, ChannelRecord, ChannelState, ChannelStore, HandlerError, NotificationDispatcher,
    Persistence,
};
use simplepush_protocol::{codec, ClientMessage, Update};
use simplepush_transport::Transport;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::ConnectionState;
use crate::error::PushError;
use crate::events::{PushEvent, EVENT_CAPACITY};
use crate::metrics;
use crate::subscription::PendingRequests;

/// Called with the raw server `hello` once the handshake completes.
pub type ConnectCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Called when the transport fails to open or drops.
pub type ConnectErrorCallback = Arc<dyn Fn(&PushError) + Send + Sync>;

/// Client settings.
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    /// Name used to tell clients apart in logs.
    pub name: String,
    /// Default push server URL.
    pub connect_url: String,
}

impl ClientSettings {
    /// Create settings for a named client.
    #[must_use]
    pub fn new(name: impl Into<String>, connect_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connect_url: connect_url.into(),
        }
    }
}

/// Options for a single `connect` call.
#[derive(Clone, Default)]
pub struct ConnectOptions {
    pub(crate) url: Option<String>,
    pub(crate) on_connect: Option<ConnectCallback>,
    pub(crate) on_connect_error: Option<ConnectErrorCallback>,
}

impl ConnectOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to `url`, replacing the client's stored connect URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Run `callback` with the raw server `hello` on every handshake.
    #[must_use]
    pub fn on_connect(mut self, callback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Run `callback` when the transport fails to open or drops.
    #[must_use]
    pub fn on_connect_error(
        mut self,
        callback: impl Fn(&PushError) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect_error = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("url", &self.url)
            .field("on_connect", &self.on_connect.is_some())
            .field("on_connect_error", &self.on_connect_error.is_some())
            .finish()
    }
}

/// Reader and writer tasks of the live connection.
pub(crate) struct ConnectionTasks {
    pub(crate) writer: JoinHandle<()>,
    pub(crate) reader: JoinHandle<()>,
}

/// Everything guarded by the client lock.
pub(crate) struct Session {
    pub(crate) store: ChannelStore,
    pub(crate) state: ConnectionState,
    /// Bumped on every connect and disconnect.
    pub(crate) generation: u64,
    pub(crate) connect_url: String,
    pub(crate) outbound: Option<mpsc::UnboundedSender<String>>,
    pub(crate) tasks: Option<ConnectionTasks>,
    pub(crate) pending: PendingRequests,
    pub(crate) on_connect: Option<ConnectCallback>,
    pub(crate) on_connect_error: Option<ConnectErrorCallback>,
}

impl Session {
    /// Check if the transport is open for sending.
    pub(crate) fn is_open(&self) -> bool {
        self.state == ConnectionState::Connected && self.outbound.is_some()
    }

    /// Queue a message on the live connection.
    pub(crate) fn send(&self, message: &ClientMessage) -> Result<(), PushError> {
        let tx = match (&self.outbound, self.state) {
            (Some(tx), ConnectionState::Connected) => tx,
            _ => return Err(PushError::NotConnected),
        };
        let frame = codec::encode(message)?;
        debug!(message_type = %message.message_type(), frame = %frame, "Sending message");
        tx.send(frame).map_err(|_| PushError::NotConnected)?;
        metrics::record_message(message.message_type().as_str(), "outbound");
        Ok(())
    }
}

pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: Mutex<Session>,
    pub(crate) dispatcher: NotificationDispatcher,
    pub(crate) events: broadcast::Sender<PushEvent>,
}

impl Inner {
    /// Publish an event to every receiver.
    pub(crate) fn emit(&self, event: PushEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Run a caller callback, containing any panic.
pub(crate) fn guarded(what: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        warn!(callback = what, "Callback panicked");
    }
}

/// A SimplePush client.
///
/// Cloning the handle is cheap; every clone drives the same client.
#[derive(Clone)]
pub struct SimplePush {
    pub(crate) inner: Arc<Inner>,
}

impl SimplePush {
    /// Create a client, loading its channel store from `persistence`.
    ///
    /// Loading starts a fresh session: every stored channel is reset to
    /// `available` and the reset is written back.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn new(
        settings: ClientSettings,
        persistence: Arc<dyn Persistence>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PushError> {
        let store = ChannelStore::load(persistence)?;
        metrics::set_channels_stored(store.len());
        debug!(
            client = %settings.name,
            transport = transport.name(),
            channels = store.len(),
            "Created push client"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session = Session {
            store,
            state: ConnectionState::Disconnected,
            generation: 0,
            connect_url: settings.connect_url,
            outbound: None,
            tasks: None,
            pending: PendingRequests::default(),
            on_connect: None,
            on_connect_error: None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                name: settings.name,
                transport,
                session: Mutex::new(session),
                dispatcher: NotificationDispatcher::new(),
                events,
            }),
        })
    }

    /// Get the client name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the URL the next `connect` uses by default.
    #[must_use]
    pub fn connect_url(&self) -> String {
        self.inner.session.lock().connect_url.clone()
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Get the stored `uaid`, if any.
    #[must_use]
    pub fn uaid(&self) -> Option<String> {
        self.inner.session.lock().store.uaid().map(str::to_string)
    }

    /// Get a snapshot of every stored channel record.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelRecord> {
        self.inner.session.lock().store.channels().to_vec()
    }

    /// Get a stored channel record.
    #[must_use]
    pub fn channel(&self, channel_id: &str) -> Option<ChannelRecord> {
        self.inner
            .session
            .lock()
            .store
            .find_by(ChannelQuery::ChannelId(channel_id))
            .cloned()
    }

    /// Channels queued while offline that still need an explicit subscribe.
    #[must_use]
    pub fn pending_new_channels(&self) -> Vec<ChannelRecord> {
        self.inner
            .session
            .lock()
            .store
            .channels()
            .iter()
            .filter(|record| record.state == ChannelState::New)
            .cloned()
            .collect()
    }

    /// Add a handler that receives every notification update.
    pub fn add_message_handler(
        &self,
        handler: impl Fn(&Update) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) {
        self.inner.dispatcher.add_listener(Arc::new(handler));
    }

    /// Subscribe to client events.
    ///
    /// Only events emitted after this call are received.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<PushEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for SimplePush {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimplePush")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
