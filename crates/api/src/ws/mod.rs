//! Task subscriptions over WebSocket.
//!
//! Provides the subscriber registry (which doubles as the dispatcher's
//! notifier), per-connection heartbeat timers, and the upgrade handler.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::task_ws_handler;
pub use heartbeat::{PING_INTERVAL, POLL_INTERVAL, PONG_TIMEOUT};
pub use manager::TaskSubscribers;
