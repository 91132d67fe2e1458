use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle state of an alert record. Transitions happen only through
/// explicit operator requests; nothing moves an alert automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Ack,
    Closed,
}

impl AlertStatus {
    /// Parse an operator-supplied status, tolerating case and whitespace.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(AlertStatus::New),
            "ack" => Ok(AlertStatus::Ack),
            "closed" => Ok(AlertStatus::Closed),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Ack => "ack",
            AlertStatus::Closed => "closed",
        }
    }
}
