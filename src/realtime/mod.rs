//! Live collaboration over WebSocket: document rooms, presence, typing
//! indicators, team chat and notification push.

mod connection;
mod hub;
mod persist;
pub mod protocol;

pub use connection::serve_socket;
pub use hub::{ConnId, FlushSettings, Hub, PendingSnapshot};
pub use protocol::{ClientMessage, PresenceUser, ServerMessage, TypingScope};
