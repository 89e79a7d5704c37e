//! The persisted push store.
//!
//! The store holds the server-assigned `uaid` and the ordered list of
//! channel records. It is always loaded and saved as one document, and every
//! mutation is written through before the mutating call returns.

use crate::channel::{ChannelId, ChannelQuery, ChannelRecord, ChannelState};
use crate::persistence::{Persistence, PersistenceError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed key the push store document is saved under.
pub const STORE_KEY: &str = "ag-push-store";

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Persisted document is not a valid push store.
    #[error("Malformed persisted state: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Store could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// The persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushStore {
    /// Server-assigned user-agent identifier.
    #[serde(default)]
    pub uaid: Option<String>,
    /// Channel records; order is significant.
    #[serde(default)]
    pub channels: Vec<ChannelRecord>,
}

impl PushStore {
    fn parse(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(StoreError::Malformed)
    }

    /// Coerce the document into a fresh-session shape.
    fn reset_session(&mut self) {
        if self.uaid.as_deref() == Some("") {
            self.uaid = None;
        }

        let mut seen = HashSet::new();
        self.channels.retain(|record| {
            let first = seen.insert(record.channel_id.clone());
            if !first {
                warn!(channel = %record.channel_id, "Dropping duplicate channel record");
            }
            first
        });

        for record in &mut self.channels {
            record.state = ChannelState::Available;
        }
    }
}

/// Channel store backed by a persistence layer.
pub struct ChannelStore {
    persistence: Arc<dyn Persistence>,
    document: PushStore,
}

impl std::fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStore")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

impl ChannelStore {
    /// Load the store, starting a fresh session.
    ///
    /// Every channel comes back `available` and the reset is written back
    /// immediately. A malformed document is discarded and replaced by an
    /// empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or written.
    pub fn load(persistence: Arc<dyn Persistence>) -> Result<Self, StoreError> {
        let mut document = match persistence.read(STORE_KEY)? {
            Some(bytes) => PushStore::parse(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding malformed push store");
                PushStore::default()
            }),
            None => PushStore::default(),
        };
        document.reset_session();

        debug!(
            uaid = ?document.uaid,
            channels = document.channels.len(),
            "Loaded push store"
        );

        let store = Self {
            persistence,
            document,
        };
        store.save()?;
        Ok(store)
    }

    /// Write the whole document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the backend write fails.
    pub fn save(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&self.document).map_err(StoreError::Serialize)?;
        self.persistence.write(STORE_KEY, &bytes)?;
        Ok(())
    }

    /// Get the stored `uaid`, if any.
    #[must_use]
    pub fn uaid(&self) -> Option<&str> {
        self.document.uaid.as_deref()
    }

    /// Adopt a new `uaid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn set_uaid(&mut self, uaid: impl Into<String>) -> Result<(), StoreError> {
        let uaid = uaid.into();
        debug!(uaid = %uaid, "Adopting uaid");
        self.document.uaid = Some(uaid);
        self.save()
    }

    /// Get all channel records in store order.
    #[must_use]
    pub fn channels(&self) -> &[ChannelRecord] {
        &self.document.channels
    }

    /// Get the number of channel records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.document.channels.len()
    }

    /// Check if the store has no channel records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.document.channels.is_empty()
    }

    /// Index of the first record matching `query`.
    #[must_use]
    pub fn position_by(&self, query: ChannelQuery<'_>) -> Option<usize> {
        self.document.channels.iter().position(|r| query.matches(r))
    }

    /// First record matching `query`.
    #[must_use]
    pub fn find_by(&self, query: ChannelQuery<'_>) -> Option<&ChannelRecord> {
        self.document.channels.iter().find(|r| query.matches(r))
    }

    /// Update the matching record's version and state, or append the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn upsert(&mut self, record: ChannelRecord) -> Result<(), StoreError> {
        match self.position_by(ChannelQuery::ChannelId(&record.channel_id)) {
            Some(index) => {
                let existing = &mut self.document.channels[index];
                existing.version = record.version;
                existing.state = record.state;
                debug!(channel = %record.channel_id, version = record.version, "Updated channel");
            }
            None => {
                debug!(channel = %record.channel_id, version = record.version, "Added channel");
                self.document.channels.push(record);
            }
        }
        self.save()
    }

    /// Append a record whose id is not yet in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn insert(&mut self, record: ChannelRecord) -> Result<(), StoreError> {
        debug_assert!(
            self.position_by(ChannelQuery::ChannelId(&record.channel_id))
                .is_none(),
            "duplicate channel id"
        );
        debug!(channel = %record.channel_id, state = %record.state, "Inserted channel");
        self.document.channels.push(record);
        self.save()
    }

    /// Replace the record at `index` wholesale.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn replace_at(&mut self, index: usize, record: ChannelRecord) -> Result<(), StoreError> {
        debug!(channel = %record.channel_id, state = %record.state, "Replaced channel");
        self.document.channels[index] = record;
        self.save()
    }

    /// Remove the record with `channel_id`.
    ///
    /// Returns the removed record, or `None` without saving if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn remove(&mut self, channel_id: &str) -> Result<Option<ChannelRecord>, StoreError> {
        let Some(index) = self.position_by(ChannelQuery::ChannelId(channel_id)) else {
            return Ok(None);
        };
        let removed = self.document.channels.remove(index);
        debug!(channel = %channel_id, "Removed channel");
        self.save()?;
        Ok(Some(removed))
    }

    /// Channel IDs to resync in a `hello`, scanned from last to first.
    #[must_use]
    pub fn hello_channels(&self) -> Vec<ChannelId> {
        self.document
            .channels
            .iter()
            .rev()
            .filter(|r| !r.is_available())
            .map(|r| r.channel_id.clone())
            .collect()
    }

    /// Records that are not `available`, in store order.
    #[must_use]
    pub fn active(&self) -> Vec<ChannelRecord> {
        self.document
            .channels
            .iter()
            .filter(|r| !r.is_available())
            .cloned()
            .collect()
    }
}
