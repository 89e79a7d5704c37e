//! Channel records for SimplePush.
//!
//! A channel is a single subscription endpoint. Its record tracks the last
//! version the server assigned and where the channel is in its local
//! lifecycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A channel identifier.
pub type ChannelId = String;

/// Generate a fresh, collision-resistant channel identifier.
#[must_use]
pub fn generate_channel_id() -> ChannelId {
    Uuid::new_v4().to_string()
}

/// Local lifecycle state of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// No live subscription; candidate for reuse.
    #[default]
    Available,
    /// Allocated while offline and never registered with the server.
    New,
    /// Bound to a live subscription.
    Used,
}

impl ChannelState {
    /// The persisted name of this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Available => "available",
            ChannelState::New => "new",
            ChannelState::Used => "used",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted channel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// Channel identifier, unique within a store.
    #[serde(rename = "channelID")]
    pub channel_id: ChannelId,
    /// Last server-assigned version.
    #[serde(default)]
    pub version: i64,
    /// Local lifecycle state.
    #[serde(default)]
    pub state: ChannelState,
    /// Whether a server round-trip has confirmed this channel.
    #[serde(default)]
    pub registered: bool,
}

impl ChannelRecord {
    /// Create a record in the `available` state.
    #[must_use]
    pub fn new(channel_id: impl Into<ChannelId>) -> Self {
        Self {
            channel_id: channel_id.into(),
            version: 0,
            state: ChannelState::Available,
            registered: false,
        }
    }

    /// Create the record built from a successful register reply.
    #[must_use]
    pub fn used(channel_id: impl Into<ChannelId>, version: i64) -> Self {
        Self {
            channel_id: channel_id.into(),
            version,
            state: ChannelState::Used,
            registered: false,
        }
    }

    /// Create a record queued while offline.
    #[must_use]
    pub fn queued(channel_id: impl Into<ChannelId>) -> Self {
        Self {
            channel_id: channel_id.into(),
            version: 0,
            state: ChannelState::New,
            registered: false,
        }
    }

    /// Check if the record is free for reuse.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state == ChannelState::Available
    }
}

/// A lookup against a single record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelQuery<'a> {
    /// Match on lifecycle state.
    State(ChannelState),
    /// Match on channel identifier.
    ChannelId(&'a str),
}

impl ChannelQuery<'_> {
    /// Check if a record matches this query.
    #[must_use]
    pub fn matches(&self, record: &ChannelRecord) -> bool {
        match self {
            ChannelQuery::State(state) => record.state == *state,
            ChannelQuery::ChannelId(id) => record.channel_id == *id,
        }
    }
}
