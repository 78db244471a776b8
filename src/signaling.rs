//! WebSocket signaling relay: client registry and message routing

mod actor;
mod messages;
mod registry;
mod server;
mod types;

pub use actor::{RouterHandle, broadcast_roster, relay};
pub use messages::{InboundMessage, Route, ServerMessage};
pub use registry::Registry;
pub use server::{DEFAULT_SIGNALING_PORT, Heartbeat, SignalingServer};
pub use types::{ClientConnection, ClientId, ClientInfo, FanOut, OutboundMessage, SignalingError};
