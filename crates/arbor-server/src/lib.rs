//! The bridge broker: peer WebSocket server, connection registry,
//! heartbeat supervision, request correlation, tool dispatch, the task
//! queue, the direct message channel, and the assistant stdio endpoint.

pub mod capabilities;
pub mod channel;
pub mod correlate;
pub mod dispatch;
pub mod handlers;
pub mod heartbeat;
pub mod outbound;
pub mod peer;
pub mod server;
pub mod state;
pub mod stdio;
pub mod tasks;

pub use server::{start, ServerHandle};
pub use state::BridgeState;
