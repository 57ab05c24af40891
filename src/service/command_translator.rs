//! Command translator: gatekeeper between untrusted client JSON and the bus.
//!
//! Validation runs in a fixed order and stops at the first violation:
//! 1. schema shape (`id`, `kind`, `params` present and correctly typed),
//! 2. `kind` is a recognized value,
//! 3. `params` satisfy the kind-specific range.
//!
//! Accepted commands are published through a [`CommandSink`]. A
//! `(session, id)` pair that was already published inside the session's
//! dedup window is acknowledged again without a second publish; reusing an
//! id for a different command is rejected.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::dedup::{DedupWindow, Recall};
use crate::bus::BusPublisher;
use crate::domain::{Command, CommandKind, GripperAction, SessionId};
use crate::error::BridgeError;

/// Where validated commands go.
pub trait CommandSink: Send + Sync + fmt::Debug {
    /// Fire-and-forget publish.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::BusUnavailable`] when the command cannot be
    /// handed to the bus right now.
    fn publish_command(&self, cmd: &Command) -> Result<(), BridgeError>;
}

impl CommandSink for BusPublisher {
    fn publish_command(&self, cmd: &Command) -> Result<(), BridgeError> {
        BusPublisher::publish_command(self, cmd)
    }
}

/// Outcome of a successful translation.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    /// A new command, ready for the bus.
    Fresh(Command),
    /// The id was already published in this session.
    Duplicate(String),
}

/// Acknowledgement for an accepted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReceipt {
    /// The command's client-supplied id.
    pub id: String,
    /// `true` when the command was a replay and was not published again.
    pub duplicate: bool,
}

/// A command that was not published, with the id to echo back.
#[derive(Debug)]
pub struct CommandRejection {
    /// The offending command's `id` (empty if unreadable).
    pub ref_id: String,
    /// Why it was rejected.
    pub error: BridgeError,
}

/// Validates, deduplicates and publishes client commands.
#[derive(Debug)]
pub struct CommandTranslator {
    sink: Arc<dyn CommandSink>,
    window: usize,
    recent: Mutex<HashMap<SessionId, DedupWindow>>,
}

impl CommandTranslator {
    /// Creates a translator publishing to `sink`, remembering `window`
    /// ids per session.
    #[must_use]
    pub fn new(sink: Arc<dyn CommandSink>, window: usize) -> Self {
        Self {
            sink,
            window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Validates `raw` and checks it against the session's dedup window.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidCommand`] naming the first offending
    /// field, or `id` when the id was already used for another command.
    pub fn translate(
        &self,
        session_id: SessionId,
        raw: &Value,
    ) -> Result<Translation, BridgeError> {
        let (id, action) = parse_command(raw)?;
        let recall = self
            .lock_recent()
            .get(&session_id)
            .map_or(Recall::New, |window| window.recall(&id, &action));
        classify(recall, id, session_id, action)
    }

    /// Translates `raw` and publishes it unless it is a duplicate.
    ///
    /// The id is reserved in the dedup window before publishing, so a
    /// concurrent replay is acknowledged as a duplicate. A failed publish
    /// releases the id again and a client retrying after `BusUnavailable`
    /// is published normally.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandRejection`] carrying either
    /// [`BridgeError::InvalidCommand`] or [`BridgeError::BusUnavailable`].
    pub fn submit(
        &self,
        session_id: SessionId,
        raw: &Value,
    ) -> Result<CommandReceipt, CommandRejection> {
        let reject = |error: BridgeError| CommandRejection {
            ref_id: read_id(raw).unwrap_or_default().to_string(),
            error,
        };
        let (id, action) = parse_command(raw).map_err(reject)?;

        let translation = {
            let mut recent = self.lock_recent();
            let window = recent
                .entry(session_id)
                .or_insert_with(|| DedupWindow::new(self.window));
            let recall = window.recall(&id, &action);
            if recall == Recall::New {
                window.record(&id, action);
            }
            classify(recall, id, session_id, action).map_err(reject)?
        };

        match translation {
            Translation::Duplicate(id) => {
                tracing::debug!(%session_id, id = %id, "duplicate command acknowledged");
                Ok(CommandReceipt {
                    id,
                    duplicate: true,
                })
            }
            Translation::Fresh(cmd) => {
                if let Err(error) = self.sink.publish_command(&cmd) {
                    self.release(session_id, &cmd.id);
                    return Err(CommandRejection { ref_id: cmd.id, error });
                }
                tracing::debug!(
                    %session_id,
                    id = %cmd.id,
                    kind = %cmd.action.kind(),
                    "command published"
                );
                Ok(CommandReceipt {
                    id: cmd.id,
                    duplicate: false,
                })
            }
        }
    }

    /// Removes `id` from the session's dedup window, e.g. because its frame
    /// never reached the bus. A later command with that id is published.
    pub fn release(&self, session_id: SessionId, id: &str) {
        if let Some(window) = self.lock_recent().get_mut(&session_id) {
            window.forget(id);
        }
    }

    /// Drops the dedup window of a closed session.
    pub fn forget_session(&self, session_id: SessionId) {
        self.lock_recent().remove(&session_id);
    }

    fn lock_recent(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, DedupWindow>> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn classify(
    recall: Recall,
    id: String,
    session_id: SessionId,
    action: GripperAction,
) -> Result<Translation, BridgeError> {
    match recall {
        Recall::New => Ok(Translation::Fresh(Command::new(id, session_id, action))),
        Recall::Replay => Ok(Translation::Duplicate(id)),
        Recall::Conflict => {
            let reason = format!("id {id:?} was already used for a different command");
            Err(BridgeError::invalid(id, reason))
        }
    }
}

fn read_id(raw: &Value) -> Option<&str> {
    raw.get("id").and_then(Value::as_str)
}

/// Steps 1-3 of validation.
fn parse_command(raw: &Value) -> Result<(String, GripperAction), BridgeError> {
    // (1) shape
    let Some(obj) = raw.as_object() else {
        return Err(BridgeError::invalid("", "command must be a JSON object"));
    };
    let id = match obj.get("id") {
        None | Some(Value::Null) => return Err(BridgeError::invalid("", "id is required")),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(_) => return Err(BridgeError::invalid("", "id must be a non-empty string")),
    };
    let kind_str = match obj.get("kind") {
        None | Some(Value::Null) => return Err(BridgeError::invalid(id, "kind is required")),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(BridgeError::invalid(id, "kind must be a string")),
    };
    let params = match obj.get("params") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(_) => return Err(BridgeError::invalid(id, "params must be an object")),
    };

    // (2) kind
    let Ok(kind) = kind_str.parse::<CommandKind>() else {
        return Err(BridgeError::invalid(
            id,
            format!("kind {kind_str:?} is not one of OPEN, CLOSE, SET_POSITION, STOP"),
        ));
    };

    // (3) params
    let position = params.and_then(|p| p.get("position")).filter(|v| !v.is_null());
    let has_params = params.is_some_and(|p| p.values().any(|v| !v.is_null()));
    if kind != CommandKind::SetPosition && has_params {
        return Err(BridgeError::invalid(id, format!("params must be empty for {kind}")));
    }
    let action = match kind {
        CommandKind::Open => GripperAction::Open,
        CommandKind::Close => GripperAction::Close,
        CommandKind::Stop => GripperAction::Stop,
        CommandKind::SetPosition => {
            let Some(position) = position else {
                return Err(BridgeError::invalid(
                    id,
                    "params.position is required for SET_POSITION",
                ));
            };
            let Some(position) = position.as_f64() else {
                return Err(BridgeError::invalid(id, "params.position must be a number"));
            };
            if !(0.0..=1.0).contains(&position) {
                return Err(BridgeError::invalid(
                    id,
                    format!("params.position must be within [0, 1], got {position}"),
                ));
            }
            GripperAction::SetPosition { position }
        }
    };
    Ok((id, action))
}
