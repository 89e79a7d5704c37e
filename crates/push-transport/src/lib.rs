//! # simplepush-transport
//!
//! Client-side transport abstraction for the SimplePush agent.
//!
//! A transport opens one full-duplex connection to a push server and hands
//! back its two halves:
//!
//! - **FrameSink** - send text frames, close the connection
//! - **FrameStream** - receive text frames until the connection closes
//!
//! Implementations:
//!
//! - **WebSocket** - `tokio-tungstenite` client (feature `websocket`)
//! - **Memory** - in-process loopback with a scriptable server side
//!
//! ```rust,ignore
//! use simplepush_transport::{Transport, WebSocketTransport};
//!
//! let (mut sink, mut stream) = WebSocketTransport::new().open("ws://localhost:7777/simplepush").await?;
//! sink.send(r#"{"messageType":"hello","uaid":""}"#.to_string()).await?;
//! while let Some(frame) = stream.recv().await? {
//!     // Process frame
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use traits::{FrameSink, FrameStream, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
