//! Events broadcast by the push agent.

use simplepush_core::{ChannelId, ChannelRecord};
use simplepush_protocol::Update;

/// Capacity of the event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// Something observable happened on the agent.
///
/// Events are fanned out on a `tokio::sync::broadcast` channel; receivers
/// that fall behind by more than [`EVENT_CAPACITY`] events see a lag error.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The hello handshake completed.
    Connected { uaid: String },
    /// The transport failed to open or dropped.
    ConnectError { reason: String },
    /// A channel registration succeeded, by reply or by hello resync.
    Registered(ChannelRecord),
    /// The server rejected a register request.
    RegistrationFailed { channel_id: ChannelId, status: u16 },
    /// The server confirmed an unregister request.
    Unregistered { channel_id: ChannelId },
    /// The server rejected an unregister request.
    UnregistrationFailed { channel_id: ChannelId, status: u16 },
    /// One update from a notification batch was delivered.
    Notification(Update),
    /// The connection closed.
    Disconnected,
}

impl PushEvent {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PushEvent::Connected { .. } => "connected",
            PushEvent::ConnectError { .. } => "connect_error",
            PushEvent::Registered(_) => "registered",
            PushEvent::RegistrationFailed { .. } => "registration_failed",
            PushEvent::Unregistered { .. } => "unregistered",
            PushEvent::UnregistrationFailed { .. } => "unregistration_failed",
            PushEvent::Notification(_) => "notification",
            PushEvent::Disconnected => "disconnected",
        }
    }
}
