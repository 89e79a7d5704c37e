//! In-process loopback transport.
//!
//! `MemoryTransport::pair` returns a client-side transport and a listener.
//! Every `open` on the transport shows up at the listener as a
//! [`MemoryPeer`], which plays the server: it reads what the client sent and
//! pushes frames back. Dropping the listener makes further `open` calls fail.

use async_trait::async_trait;
use simplepush_protocol::{codec, ClientMessage, ProtocolError, ServerMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{FrameSink, FrameStream, Transport, TransportError};

/// Server-to-client item; `Err` carries an injected transport failure.
type Inbound = Result<String, String>;

/// Client side of the loopback.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    acceptor: mpsc::UnboundedSender<MemoryPeer>,
}

/// Server side of the loopback, yielding one peer per opened connection.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryTransport {
    /// Create a connected transport/listener pair.
    #[must_use]
    pub fn pair() -> (Self, MemoryListener) {
        let (acceptor, incoming) = mpsc::unbounded_channel();
        (Self { acceptor }, MemoryListener { incoming })
    }
}

impl MemoryListener {
    /// Wait for the next opened connection.
    ///
    /// Returns `None` once every transport handle has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// Take an already opened connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.try_recv().ok()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        url: &str,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            to_client: Some(server_tx),
            from_client: client_rx,
        };
        self.acceptor
            .send(peer)
            .map_err(|_| TransportError::connect_failed(url, "listener closed"))?;

        debug!(url = %url, "Memory connection opened");

        let sink = MemorySink {
            tx: Some(client_tx),
        };
        let stream = MemoryStream { rx: server_rx };
        Ok((Box::new(sink), Box::new(stream)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// The server end of one loopback connection.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    to_client: Option<mpsc::UnboundedSender<Inbound>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// URL the client opened.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a raw frame to the client.
    ///
    /// Returns `false` if the client is gone or this side closed.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        match &self.to_client {
            Some(tx) => tx.send(Ok(frame.into())).is_ok(),
            None => false,
        }
    }

    /// Push a server message to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn send_message(&self, message: &ServerMessage) -> Result<bool, ProtocolError> {
        Ok(self.send(codec::encode_server(message)?))
    }

    /// Receive the next raw frame from the client.
    ///
    /// Returns `None` once the client has closed its sink.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Receive the next frame without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Receive and decode the next client message.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a client message.
    pub async fn recv_message(&mut self) -> Result<Option<ClientMessage>, ProtocolError> {
        match self.recv().await {
            Some(frame) => codec::decode_client(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Stop accepting frames, so the client's next send fails.
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }

    /// Check if the client has dropped its receiving half.
    #[must_use]
    pub fn is_client_gone(&self) -> bool {
        self.to_client.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Close the connection cleanly from the server side.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Fail the connection with a transport error.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if let Some(tx) = self.to_client.take() {
            let _ = tx.send(Err(reason.into()));
        }
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}
