//! Inbound message handling.

use serde::Deserialize;
use serde_json::Value;
use simplepush_core::ChannelRecord;
use simplepush_protocol::{codec, ClientMessage, ServerMessage, Update, STATUS_OK};
use tracing::{debug, info, warn};

use crate::client::{guarded, Inner};
use crate::error::PushError;
use crate::events::PushEvent;
use crate::metrics;
use crate::subscription::PendingRequest;

impl Inner {
    /// Handle one inbound frame.
    ///
    /// Frames that are not a known server message are logged and dropped.
    /// Errors are scoped to the message; the connection stays up.
    pub(crate) fn handle_frame(&self, frame: &str) -> Result<(), PushError> {
        let raw = match codec::decode_value(frame) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(client = %self.name, error = %e, "Dropping undecodable frame");
                return Ok(());
            }
        };
        let message = match codec::from_value(raw.clone()) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    client = %self.name,
                    message_type = ?raw.get(codec::MESSAGE_TYPE_FIELD),
                    error = %e,
                    "Dropping unknown message"
                );
                return Ok(());
            }
        };

        debug!(message_type = %message.message_type(), frame = %frame, "Received message");
        metrics::record_message(message.message_type().as_str(), "inbound");

        match message {
            ServerMessage::Hello { uaid } => self.on_hello(uaid, raw),
            ServerMessage::Register {
                status,
                channel_id,
                version,
            } => self.on_register(status, channel_id, version),
            ServerMessage::Unregister { status, channel_id } => {
                self.on_unregister(status, channel_id)
            }
            ServerMessage::Notification { updates } => self.on_notification(updates),
        }
    }

    fn on_hello(&self, uaid: String, raw: Value) -> Result<(), PushError> {
        let (resynced, on_connect) = {
            let mut session = self.session.lock();
            let mut resynced = Vec::new();
            if session.store.uaid() == Some(uaid.as_str()) {
                // Known channels are live on the server already; no register follows.
                for record in session.store.active() {
                    let requests = session.pending.take(&record.channel_id);
                    resynced.push((record, requests));
                }
            } else {
                session.store.set_uaid(uaid.as_str())?;
            }
            (resynced, session.on_connect.clone())
        };

        info!(
            client = %self.name,
            uaid = %uaid,
            resynced = resynced.len(),
            "Handshake complete"
        );

        for (record, requests) in resynced {
            self.resolve(record, requests);
        }
        self.emit(PushEvent::Connected { uaid });
        if let Some(callback) = on_connect {
            guarded("on_connect", || callback(&raw));
        }
        Ok(())
    }

    fn on_register(&self, status: u16, channel_id: String, version: i64) -> Result<(), PushError> {
        metrics::record_registration(status == STATUS_OK);

        if status != STATUS_OK {
            let requests = self.session.lock().pending.take(&channel_id);
            let error = PushError::Registration {
                channel_id: channel_id.clone(),
                status,
            };
            for request in requests {
                request.fail(&error);
            }
            self.emit(PushEvent::RegistrationFailed { channel_id, status });
            return Err(error);
        }

        let record = ChannelRecord::used(channel_id.as_str(), version);
        let requests = {
            let mut session = self.session.lock();
            session.store.upsert(record.clone())?;
            metrics::set_channels_stored(session.store.len());
            session.pending.take(&channel_id)
        };

        debug!(channel = %channel_id, version, "Channel registered");
        self.resolve(record, requests);
        Ok(())
    }

    fn on_unregister(&self, status: u16, channel_id: String) -> Result<(), PushError> {
        metrics::record_unregistration(status == STATUS_OK);

        if status != STATUS_OK {
            self.emit(PushEvent::UnregistrationFailed {
                channel_id: channel_id.clone(),
                status,
            });
            return Err(PushError::Unregistration { channel_id, status });
        }

        let removed = {
            let mut session = self.session.lock();
            let removed = session.store.remove(&channel_id)?;
            metrics::set_channels_stored(session.store.len());
            removed
        };
        self.dispatcher.unbind(&channel_id);

        if removed.is_none() {
            debug!(channel = %channel_id, "Unregistered channel was not stored");
        } else {
            debug!(channel = %channel_id, "Channel unregistered");
        }
        self.emit(PushEvent::Unregistered { channel_id });
        Ok(())
    }

    /// Deliver every update, then acknowledge the batch as received.
    ///
    /// Entries that do not parse as an [`Update`] are skipped for delivery
    /// but still echoed in the ack.
    fn on_notification(&self, updates: Vec<Value>) -> Result<(), PushError> {
        let mut failures = 0;
        for raw in &updates {
            let update = match Update::deserialize(raw) {
                Ok(update) => update,
                Err(e) => {
                    warn!(update = %raw, error = %e, "Skipping malformed update");
                    failures += 1;
                    continue;
                }
            };
            failures += self.dispatcher.deliver(&update).failed;
            self.emit(PushEvent::Notification(update));
        }
        metrics::record_notifications(updates.len(), failures);

        debug!(updates = updates.len(), failures, "Acknowledging notification");
        self.session.lock().send(&ClientMessage::ack(updates))
    }

    fn resolve(&self, record: ChannelRecord, requests: Vec<PendingRequest>) {
        for request in requests {
            request.succeed(&record, &self.dispatcher);
        }
        self.emit(PushEvent::Registered(record));
    }
}
