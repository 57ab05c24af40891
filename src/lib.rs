//! # gripper-bridge
//!
//! WebSocket bridge between browser clients and a robotic gripper driver
//! that lives on a publish/subscribe device bus (rosbridge protocol).
//!
//! Many unreliable WebSocket sessions on one side, one shared bus link on
//! the other. Every client sees the same monotonically sequenced gripper
//! state, and a slow client only ever loses its own stale updates.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Handler / Session Manager (ws/)
//!     ├── REST Handlers (api/)
//!     │
//!     ├── Command Translator (service/)
//!     ├── State Cache (domain/)
//!     │
//!     ├── Bus Client (bus/)
//!     │
//!     └── Device bus (rosbridge) ── gripper driver
//! ```

pub mod api;
pub mod app_state;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod service;
pub mod ws;
