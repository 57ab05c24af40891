//! Typed gripper commands.
//!
//! Client input is loosely typed JSON; once it passes the
//! [`crate::service::CommandTranslator`] it becomes a [`Command`] and all
//! downstream code works with the typed form only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::SessionId;

/// Recognized command kinds, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    /// Open the fingers fully.
    Open,
    /// Close the fingers fully.
    Close,
    /// Move to a normalized target position.
    SetPosition,
    /// Halt any motion in progress.
    Stop,
}

impl CommandKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
            Self::SetPosition => "SET_POSITION",
            Self::Stop => "STOP",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "CLOSE" => Ok(Self::Close),
            "SET_POSITION" => Ok(Self::SetPosition),
            "STOP" => Ok(Self::Stop),
            _ => Err(()),
        }
    }
}

/// A command with its kind-specific parameters already range-checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GripperAction {
    /// Open the fingers fully.
    Open,
    /// Close the fingers fully.
    Close,
    /// Move to `position`, guaranteed to lie in `[0.0, 1.0]`.
    SetPosition {
        /// Normalized target position.
        position: f64,
    },
    /// Halt any motion in progress.
    Stop,
}

impl GripperAction {
    /// Returns the kind discriminator.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Open => CommandKind::Open,
            Self::Close => CommandKind::Close,
            Self::SetPosition { .. } => CommandKind::SetPosition,
            Self::Stop => CommandKind::Stop,
        }
    }

    /// Returns the target position for `SET_POSITION`, `None` otherwise.
    #[must_use]
    pub const fn target_position(&self) -> Option<f64> {
        match self {
            Self::SetPosition { position } => Some(*position),
            _ => None,
        }
    }
}

/// A validated, bus-ready client command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Client-generated correlation token, unique per session.
    pub id: String,
    /// Session the command arrived on.
    pub session_id: SessionId,
    /// What the gripper should do.
    pub action: GripperAction,
    /// When the bridge accepted the command.
    pub issued_at: DateTime<Utc>,
}

impl Command {
    /// Creates a command stamped with the current time.
    #[must_use]
    pub fn new(id: String, session_id: SessionId, action: GripperAction) -> Self {
        Self {
            id,
            session_id,
            action,
            issued_at: Utc::now(),
        }
    }

    /// Correlation token used on the device bus: `"<session>:<id>"`.
    #[must_use]
    pub fn bus_correlation_id(&self) -> String {
        format!("{}:{}", self.session_id, self.id)
    }
}
