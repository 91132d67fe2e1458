//! Typed event model.
//!
//! Collectors report events as `{ts, source, event_type, severity, payload}`
//! where `payload` is a loose key/value map extracted from auth logs. The
//! ingestion gateway validates that map into one of the typed attribute
//! sets below before anything reaches the event log, so the detectors and
//! the read path never see an untyped bag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const SOURCE_AUTH: &str = "auth";
pub const EVENT_SSH_FAILED_LOGIN: &str = "ssh_failed_login";
pub const EVENT_SSH_LOGIN_SUCCESS: &str = "ssh_login_success";
pub const EVENT_SUDO_COMMAND: &str = "sudo_command";

/// Baseline severity stamped on events that arrive without one.
pub const DEFAULT_SEVERITY: i64 = 1;

/// One event as reported by a collector, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    pub source: String,
    pub event_type: String,
    #[serde(default)]
    pub severity: i64,
    pub payload: serde_json::Value,
}

/// Attributes of an SSH authentication attempt (failed or successful).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshAuthAttrs {
    pub username: String,
    pub remote_ip: String,
    #[serde(default)]
    pub auth_method: String,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub dst_port: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
}

/// Attributes of a sudo invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SudoCommandAttrs {
    pub sudo_user: String,
    pub target_user: String,
    #[serde(default)]
    pub tty: String,
    #[serde(default)]
    pub pwd: String,
    pub command: String,
    #[serde(default)]
    pub is_sudo_root: bool,
    #[serde(default)]
    pub is_target_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,
}

/// Validated attribute set, tagged by the event type it belongs to.
/// Serializes untagged so the stored payload keeps the collector's
/// field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrSet {
    SshAuth(SshAuthAttrs),
    SudoCommand(SudoCommandAttrs),
}

impl AttrSet {
    /// Validate a raw payload against the schema for `event_type`.
    /// Unknown event types and missing required fields reject the batch.
    pub fn validate(event_type: &str, payload: &serde_json::Value) -> Result<Self, CoreError> {
        match event_type {
            EVENT_SSH_FAILED_LOGIN | EVENT_SSH_LOGIN_SUCCESS => {
                let attrs: SshAuthAttrs = serde_json::from_value(payload.clone())
                    .map_err(|e| CoreError::InvalidPayload(format!("{event_type}: {e}")))?;
                Ok(AttrSet::SshAuth(attrs))
            }
            EVENT_SUDO_COMMAND => {
                let attrs: SudoCommandAttrs = serde_json::from_value(payload.clone())
                    .map_err(|e| CoreError::InvalidPayload(format!("{event_type}: {e}")))?;
                Ok(AttrSet::SudoCommand(attrs))
            }
            other => Err(CoreError::InvalidPayload(format!(
                "unknown event_type '{other}'"
            ))),
        }
    }

    /// Serialized form stored in the event log.
    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::InvalidPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_ssh_failed_login() {
        let payload = json!({
            "username": "root",
            "remote_ip": "1.2.3.4",
            "auth_method": "password",
            "is_root": true,
            "dst_port": 22,
            "raw_line": "Failed password for root from 1.2.3.4 port 50022 ssh2"
        });
        let attrs = AttrSet::validate(EVENT_SSH_FAILED_LOGIN, &payload).unwrap();
        match attrs {
            AttrSet::SshAuth(a) => {
                assert_eq!(a.remote_ip, "1.2.3.4");
                assert!(a.is_root);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn sudo_optional_flags_default_to_false() {
        let payload = json!({
            "sudo_user": "alice",
            "target_user": "root",
            "tty": "pts/0",
            "pwd": "/home/alice",
            "command": "/usr/bin/ls /root"
        });
        let attrs = AttrSet::validate(EVENT_SUDO_COMMAND, &payload).unwrap();
        match attrs {
            AttrSet::SudoCommand(a) => {
                assert!(!a.is_sudo_root);
                assert!(!a.is_target_root);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        let err = AttrSet::validate("ssh_disconnect", &json!({})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
    }

    #[test]
    fn rejects_ssh_payload_without_remote_ip() {
        let err =
            AttrSet::validate(EVENT_SSH_FAILED_LOGIN, &json!({"username": "bob"})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
    }

    #[test]
    fn stored_payload_keeps_collector_field_names() {
        let payload = json!({"username": "bob", "remote_ip": "5.6.7.8"});
        let attrs = AttrSet::validate(EVENT_SSH_LOGIN_SUCCESS, &payload).unwrap();
        let stored: serde_json::Value = serde_json::from_str(&attrs.to_json().unwrap()).unwrap();
        assert_eq!(stored["remote_ip"], "5.6.7.8");
        assert_eq!(stored["username"], "bob");
    }
}
