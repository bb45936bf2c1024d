//! Queued outbox operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Entity tag for walk sessions, the one entity the sync engine dispatches.
///
/// The queue itself stores `entity` as free-form text so the format stays
/// general; operations carrying any other tag fail loudly at dispatch.
pub const WALK_SESSION_ENTITY: &str = "walk_session";

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Session mutation kinds the sync engine knows how to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    UpdateSpeed,
    End,
    Cancel,
}

impl SessionAction {
    /// Stable tag used in queue storage and payload dispatch
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::UpdateSpeed => "update_speed",
            Self::End => "end",
            Self::Cancel => "cancel",
        }
    }
}

impl FromStr for SessionAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "update_speed" => Ok(Self::UpdateSpeed),
            "end" => Ok(Self::End),
            "cancel" => Ok(Self::Cancel),
            other => Err(Error::InvalidInput(format!("Unknown action: {other}"))),
        }
    }
}

/// Delivery state of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    /// Waiting for (re)delivery by the sync engine
    Pending,
    /// Abandoned after the retry ceiling; kept for diagnostics only
    Dead,
}

impl OpState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dead => "dead",
        }
    }
}

impl FromStr for OpState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dead" => Ok(Self::Dead),
            other => Err(Error::InvalidInput(format!("Unknown op state: {other}"))),
        }
    }
}

/// A locally queued mutation awaiting delivery to the remote backend
///
/// `attempts` counts failed deliveries and is never reset; `last_error`
/// holds the most recent failure message and disappears with the operation
/// on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Locally assigned identifier
    pub id: OperationId,
    /// Target entity tag (free-form in storage)
    pub entity: String,
    /// Action tag (free-form in storage)
    pub action: String,
    /// Action-specific payload
    pub payload: serde_json::Value,
    /// Owner of the operation, required for every remote write
    pub user_id: String,
    /// Enqueue timestamp (Unix ms), for diagnostics ordering/display
    pub created_at: i64,
    /// Failed delivery attempts
    pub attempts: u32,
    /// Last captured delivery error
    pub last_error: Option<String>,
    /// Pending or dead-lettered
    pub state: OpState,
}

impl QueuedOperation {
    /// Create a new pending operation with a fresh local ID
    #[must_use]
    pub fn new(
        entity: impl Into<String>,
        action: impl Into<String>,
        payload: serde_json::Value,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            entity: entity.into(),
            action: action.into(),
            payload,
            user_id: user_id.into(),
            created_at: crate::util::unix_timestamp_ms(),
            attempts: 0,
            last_error: None,
            state: OpState::Pending,
        }
    }

    fn session_op(
        action: SessionAction,
        payload: &impl Serialize,
        user_id: &str,
    ) -> crate::Result<Self> {
        let payload = serde_json::to_value(payload)?;
        Ok(Self::new(WALK_SESSION_ENTITY, action.as_str(), payload, user_id))
    }

    /// Queue a session start
    pub fn start(user_id: &str, payload: &StartPayload) -> crate::Result<Self> {
        Self::session_op(SessionAction::Start, payload, user_id)
    }

    /// Queue a session pause
    pub fn pause(user_id: &str, payload: &PausePayload) -> crate::Result<Self> {
        Self::session_op(SessionAction::Pause, payload, user_id)
    }

    /// Queue a session resume
    pub fn resume(user_id: &str, payload: &ResumePayload) -> crate::Result<Self> {
        Self::session_op(SessionAction::Resume, payload, user_id)
    }

    /// Queue a walking speed change
    pub fn update_speed(user_id: &str, payload: &UpdateSpeedPayload) -> crate::Result<Self> {
        Self::session_op(SessionAction::UpdateSpeed, payload, user_id)
    }

    /// Queue a session end
    pub fn end(user_id: &str, payload: &EndPayload) -> crate::Result<Self> {
        Self::session_op(SessionAction::End, payload, user_id)
    }

    /// Queue a session cancellation
    pub fn cancel(user_id: &str, payload: &CancelPayload) -> crate::Result<Self> {
        Self::session_op(SessionAction::Cancel, payload, user_id)
    }
}

/// Payload for `start`: creates the remote row and registers the mapping
/// from `local_id` to the server-assigned ID on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPayload {
    /// Locally generated placeholder ID for the future session row
    pub local_id: String,
    /// Session start time (Unix ms)
    pub started_at: i64,
    /// Initial walking speed in km/h
    pub speed_kmh: f64,
}

/// Payload for `pause`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PausePayload {
    /// Local or server session ID; resolved through the mapping table
    pub session_id: String,
    /// Pause start time (Unix ms)
    pub paused_at: i64,
}

/// Payload for `resume`
///
/// `pause_secs` is the pause interval measured by the caller at enqueue
/// time; the backend adds it to the cumulative total in one atomic
/// statement, so no read-modify-write happens on delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub session_id: String,
    /// Resume time (Unix ms)
    pub resumed_at: i64,
    /// Measured pause interval to add to the cumulative total, in seconds
    pub pause_secs: i64,
}

/// Payload for `update_speed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSpeedPayload {
    pub session_id: String,
    pub speed_kmh: f64,
}

/// Payload for `end`: an arbitrary set of field updates applied as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndPayload {
    pub session_id: String,
    /// Column/value pairs passed through to the remote update
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Payload for `cancel`: deletes the remote row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelPayload {
    pub session_id: String,
}
