//! Domain layer: core types shared by the bus side and the session side.
//!
//! This module contains the gripper state snapshot, the typed command
//! model, session identity, and the last-known-state cache.

pub mod command;
pub mod gripper_state;
pub mod session_id;
pub mod state_cache;

pub use command::{Command, CommandKind, GripperAction};
pub use gripper_state::{GripperState, GripperStatus};
pub use session_id::SessionId;
pub use state_cache::StateCache;
