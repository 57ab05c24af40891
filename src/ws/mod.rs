//! WebSocket layer: sessions, fan-out queues and the per-session task.
//!
//! The endpoint at `/ws` carries gripper state to clients and commands
//! back to the bus.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod outbound;
pub mod session;
pub mod session_manager;
pub mod subscription;

pub use connection::SessionOptions;
pub use messages::{ClientMessage, ServerFrame};
pub use outbound::{Outbound, OutboundQueue, PushOutcome};
pub use session::{SessionHandle, SessionPhase};
pub use session_manager::SessionManager;
pub use subscription::{SubscriptionManager, Topic};
