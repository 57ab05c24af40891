//! Device bus side: the single connection to the gripper driver's
//! pub/sub network.
//!
//! [`BusClient`] owns the link and reconnects with backoff;
//! [`BusPublisher`] is the cloneable command entry point handed to the
//! command translator.

pub mod backoff;
pub mod client;
pub mod protocol;
pub mod transport;

pub use backoff::Backoff;
pub use client::{
    BusClient, BusPublisher, BusSettings, LinkStatus, TelemetryHandler, UndeliveredHandler,
};
pub use transport::{BusLink, BusTransport, WsBusTransport};
