//! # simplepush-protocol
//!
//! Wire protocol definitions for the SimplePush client.
//!
//! Every message is a single JSON object whose `messageType` field selects
//! its shape. The client and server speak different subsets, so the two
//! directions are modelled as separate enums.
//!
//! ## Message Types
//!
//! - `hello` - Identity handshake and channel resync
//! - `register` / `unregister` - Channel membership
//! - `notification` - Server-pushed version updates
//! - `ack` - Client acknowledgment of a notification batch
//!
//! ## Example
//!
//! ```rust
//! use simplepush_protocol::{codec, ClientMessage};
//!
//! let hello = ClientMessage::hello("", None);
//! let text = codec::encode(&hello).unwrap();
//! assert_eq!(text, r#"{"messageType":"hello","uaid":""}"#);
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use messages::{ClientMessage, MessageType, ServerMessage, Update, STATUS_OK};
