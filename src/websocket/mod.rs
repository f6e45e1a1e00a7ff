//! WebSocket module for exchange connection management

mod channel;
mod client;
mod session;

pub use channel::{Connector, MessageChannel};
pub use client::{WebSocketClient, WsConnector};
pub use session::{FeedSession, SessionConfig, SessionState};
