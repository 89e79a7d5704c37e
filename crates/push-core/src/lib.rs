//! # simplepush-core
//!
//! Core state for a SimplePush client agent.
//!
//! This crate provides the pieces that carry no transport knowledge:
//!
//! - **Channel** - Channel records and their lifecycle state
//! - **Store** - The persisted push store (`uaid` plus channel records)
//! - **Persistence** - Whole-document storage backends
//! - **Dispatcher** - Per-channel notification delivery
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Adapter   │────▶│ ChannelStore│────▶│ Persistence │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ Dispatcher  │
//! └─────────────┘
//! ```

pub mod channel;
pub mod dispatcher;
pub mod persistence;
pub mod store;

pub use channel::{generate_channel_id, ChannelId, ChannelQuery, ChannelRecord, ChannelState};
pub use dispatcher::{DeliveryReport, HandlerError, NotificationDispatcher, NotificationHandler};
pub use persistence::{FilePersistence, MemoryPersistence, Persistence, PersistenceError};
pub use store::{ChannelStore, PushStore, StoreError, STORE_KEY};
