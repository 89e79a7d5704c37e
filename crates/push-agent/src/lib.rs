//! # simplepush-agent
//!
//! A SimplePush client agent.
//!
//! The agent keeps a persisted registry of channels, performs the `hello`
//! handshake with a push server, registers and unregisters channels, and
//! hands server-pushed notifications to local callbacks while acknowledging
//! every batch.
//!
//! - **Client** - [`SimplePush`], the handle owning store and connection
//! - **Connection** - transport lifecycle and the hello handshake
//! - **Handler** - inbound message processing
//! - **Subscription** - subscribe/unsubscribe, online and offline
//! - **Events** - [`PushEvent`] broadcast
//!
//! ## Example
//!
//! ```rust,ignore
//! use simplepush_agent::{ClientSettings, ConnectOptions, SimplePush, SubscribeRequest};
//! use simplepush_core::FilePersistence;
//! use simplepush_transport::WebSocketTransport;
//! use std::sync::Arc;
//!
//! let push = SimplePush::new(
//!     ClientSettings::new("agPushNetwork", "ws://localhost:7777/simplepush"),
//!     Arc::new(FilePersistence::new("/var/lib/simplepush")),
//!     Arc::new(WebSocketTransport::new()),
//! )?;
//! push.connect(ConnectOptions::new().on_connect(|hello| println!("{hello}"))).await?;
//! push.subscribe(
//!     [SubscribeRequest::new().on_success(|record| println!("{}", record.channel_id))],
//!     false,
//! )?;
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
mod handler;
pub mod metrics;
pub mod subscription;

pub use client::{ClientSettings, ConnectCallback, ConnectErrorCallback, ConnectOptions, SimplePush};
pub use connection::ConnectionState;
pub use error::PushError;
pub use events::PushEvent;
pub use subscription::{ErrorCallback, SubscribeRequest, SuccessCallback};
