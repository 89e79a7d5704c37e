//! Connection lifecycle.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open──▶ Connected ──disconnect──▶ Disconnecting
//!      ▲                        │                    │                          │
//!      └────── open failed ─────┘◀── transport error ┘◀─────────── closed ──────┘
//! ```
//!
//! A connection is a writer task draining the outbound queue into the
//! transport sink and a reader task feeding inbound frames to the protocol
//! handler. Nothing here reconnects; the caller decides when to connect again.

use simplepush_core::ChannelStore;
use simplepush_protocol::{codec, ClientMessage};
use simplepush_transport::{FrameSink, FrameStream, TransportError};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::client::{
    guarded, ConnectErrorCallback, ConnectOptions, ConnectionTasks, Inner, SimplePush,
};
use crate::error::PushError;
use crate::events::PushEvent;
use crate::metrics;

/// Connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is opening.
    Connecting,
    /// Transport is open and the hello has been sent.
    Connected,
    /// `disconnect` is closing the transport.
    Disconnecting,
    /// No transport.
    #[default]
    Disconnected,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the handshake for the current store.
///
/// Channels are only listed once a `uaid` is known.
pub(crate) fn hello_message(store: &ChannelStore) -> ClientMessage {
    match store.uaid() {
        Some(uaid) if !uaid.is_empty() => {
            ClientMessage::hello(uaid, Some(store.hello_channels()))
        }
        _ => ClientMessage::hello("", None),
    }
}

/// Result of installing an opened transport.
enum Install {
    Ready,
    /// `disconnect` ran while the transport was opening.
    Stale(Box<dyn FrameSink>),
    Failed(PushError, Box<dyn FrameSink>, Option<ConnectErrorCallback>),
}

impl SimplePush {
    /// Open the transport and send the hello handshake.
    ///
    /// Returns once the transport is open and the hello is queued; the
    /// handshake reply arrives later through `on_connect` and
    /// [`PushEvent::Connected`]. If the transport cannot be opened,
    /// `on_connect_error` runs and the error is also returned. The client is
    /// left disconnected and `connect` may be called again.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` unless the client is disconnected, or a
    /// `Connection` error if the transport fails to open.
    pub async fn connect(&self, options: ConnectOptions) -> Result<(), PushError> {
        let ConnectOptions {
            url,
            on_connect,
            on_connect_error,
        } = options;

        let (url, generation) = {
            let mut session = self.inner.session.lock();
            if session.state != ConnectionState::Disconnected {
                return Err(PushError::AlreadyConnected);
            }
            if let Some(url) = url {
                session.connect_url = url;
            }
            session.generation += 1;
            session.state = ConnectionState::Connecting;
            session.on_connect = on_connect;
            session.on_connect_error = on_connect_error;
            (session.connect_url.clone(), session.generation)
        };

        info!(client = %self.inner.name, url = %url, "Connecting");

        let (sink, stream) = match self.inner.transport.open(&url).await {
            Ok(halves) => halves,
            Err(e) => {
                error!(client = %self.inner.name, url = %url, error = %e, "Connect failed");
                let error = PushError::connection(&url, e);
                let callback = {
                    let mut session = self.inner.session.lock();
                    if session.generation == generation {
                        session.state = ConnectionState::Disconnected;
                        session.on_connect_error.clone()
                    } else {
                        None
                    }
                };
                self.inner.report_connect_error(&error, callback);
                return Err(error);
            }
        };

        let install = {
            let mut session = self.inner.session.lock();
            if session.generation != generation {
                Install::Stale(sink)
            } else {
                match codec::encode(&hello_message(&session.store)) {
                    Ok(frame) => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        debug!(frame = %frame, "Sending hello");
                        metrics::record_message("hello", "outbound");
                        // rx is alive until handed to the writer
                        let _ = tx.send(frame);

                        let weak = Arc::downgrade(&self.inner);
                        let writer = tokio::spawn(write_loop(weak.clone(), generation, sink, rx));
                        let reader = tokio::spawn(read_loop(weak, generation, stream));

                        session.state = ConnectionState::Connected;
                        session.outbound = Some(tx);
                        session.tasks = Some(ConnectionTasks { writer, reader });
                        Install::Ready
                    }
                    Err(e) => {
                        session.state = ConnectionState::Disconnected;
                        Install::Failed(e.into(), sink, session.on_connect_error.clone())
                    }
                }
            }
        };

        match install {
            Install::Ready => {
                metrics::record_connection();
                info!(client = %self.inner.name, url = %url, "Connected");
                Ok(())
            }
            Install::Stale(mut sink) => {
                let _ = sink.close().await;
                Err(PushError::connection(url, "disconnected while connecting"))
            }
            Install::Failed(error, mut sink, callback) => {
                error!(client = %self.inner.name, error = %error, "Hello could not be sent");
                let _ = sink.close().await;
                self.inner.report_connect_error(&error, callback);
                Err(error)
            }
        }
    }

    /// Close the transport.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if there is no connection to close.
    pub async fn disconnect(&self) -> Result<(), PushError> {
        self.disconnect_with(|| {}).await
    }

    /// Close the transport, then run `on_disconnect`.
    ///
    /// Messages already queued are flushed before the transport closes.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if there is no connection to close.
    pub async fn disconnect_with(
        &self,
        on_disconnect: impl FnOnce() + Send,
    ) -> Result<(), PushError> {
        let tasks = {
            let mut session = self.inner.session.lock();
            match session.state {
                ConnectionState::Connecting | ConnectionState::Connected => {}
                ConnectionState::Disconnecting | ConnectionState::Disconnected => {
                    return Err(PushError::NotConnected);
                }
            }
            session.generation += 1;
            session.state = ConnectionState::Disconnecting;
            session.outbound = None;
            session.tasks.take()
        };

        info!(client = %self.inner.name, "Disconnecting");

        if let Some(tasks) = tasks {
            // Dropping the queue sender lets the writer drain and close.
            if let Err(e) = tasks.writer.await {
                warn!(error = %e, "Writer task failed");
            }
            tasks.reader.abort();
        }

        {
            let mut session = self.inner.session.lock();
            if session.state == ConnectionState::Disconnecting {
                session.state = ConnectionState::Disconnected;
            }
        }

        info!(client = %self.inner.name, "Disconnected");
        self.inner.emit(PushEvent::Disconnected);
        guarded("on_disconnect", on_disconnect);
        Ok(())
    }
}

impl Inner {
    /// Check if `generation` is the open connection.
    pub(crate) fn is_live(&self, generation: u64) -> bool {
        let session = self.session.lock();
        session.generation == generation && session.state == ConnectionState::Connected
    }

    /// Tear down after the transport closed or failed under `generation`.
    ///
    /// No-op if that connection is no longer the open one.
    fn connection_lost(&self, generation: u64, error: Option<TransportError>) {
        let (tasks, callback) = {
            let mut session = self.session.lock();
            if session.generation != generation || session.state != ConnectionState::Connected {
                return;
            }
            session.state = ConnectionState::Disconnected;
            session.outbound = None;
            (session.tasks.take(), session.on_connect_error.clone())
        };
        // The writer drains and closes on its own once the queue is dropped.
        if let Some(tasks) = tasks {
            tasks.reader.abort();
        }

        match error {
            Some(e) => {
                error!(client = %self.name, error = %e, "Connection failed");
                self.report_connect_error(&PushError::Transport(e), callback);
            }
            None => info!(client = %self.name, "Server closed the connection"),
        }
        self.emit(PushEvent::Disconnected);
    }

    fn report_connect_error(&self, error: &PushError, callback: Option<ConnectErrorCallback>) {
        metrics::record_connect_error();
        self.emit(PushEvent::ConnectError {
            reason: error.to_string(),
        });
        if let Some(callback) = callback {
            guarded("on_connect_error", || callback(error));
        }
    }
}

async fn write_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = rx.recv().await {
        trace!(bytes = frame.len(), "Writing frame");
        if let Err(e) = sink.send(frame).await {
            if let Some(inner) = inner.upgrade() {
                inner.connection_lost(generation, Some(e));
            }
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Transport close failed");
    }
    trace!(generation, "Writer finished");
}

async fn read_loop(inner: Weak<Inner>, generation: u64, mut stream: Box<dyn FrameStream>) {
    loop {
        let received = stream.recv().await;
        let Some(client) = inner.upgrade() else {
            break;
        };

        match received {
            Ok(Some(frame)) => {
                if !client.is_live(generation) {
                    break;
                }
                if let Err(e) = client.handle_frame(&frame) {
                    if e.is_channel_error() {
                        warn!(client = %client.name, error = %e, "Channel operation rejected");
                    } else {
                        error!(client = %client.name, error = %e, "Failed to handle message");
                    }
                }
            }
            Ok(None) => {
                client.connection_lost(generation, None);
                break;
            }
            Err(e) => {
                client.connection_lost(generation, Some(e));
                break;
            }
        }
    }
    trace!(generation, "Reader finished");
}
