//! Walk session model shared with the remote backend

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Coarse session state stored on the remote row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

impl FromStr for SessionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(Error::InvalidInput(format!("Unknown session state: {other}"))),
        }
    }
}

/// Fields for inserting a fresh walk session row
///
/// The backend assigns the row ID; it comes back through the insert
/// response and feeds the local-to-server ID mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewWalkSession {
    /// Session start time (Unix ms)
    pub started_at: i64,
    /// Initial walking speed in km/h
    pub speed_kmh: f64,
}
