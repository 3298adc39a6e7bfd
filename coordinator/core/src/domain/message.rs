// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const MAX_CHANNEL_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel name must not be empty")]
    Empty,

    #[error("channel name is longer than 200 characters")]
    TooLong,

    #[error("channel name may only contain [A-Za-z0-9._:/-]")]
    InvalidCharacters,
}

/// Validated channel name.
pub fn validate_channel(raw: &str) -> Result<String, ChannelError> {
    let channel = raw.trim();
    if channel.is_empty() {
        return Err(ChannelError::Empty);
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(ChannelError::TooLong);
    }
    let ok = channel
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-'));
    if !ok {
        return Err(ChannelError::InvalidCharacters);
    }
    Ok(channel.to_string())
}

/// Returns a reason when the payload is not publishable.
pub fn payload_problem(payload: &Value) -> Option<&'static str> {
    match payload {
        Value::Null => Some("payload is required"),
        Value::String(s) if s.trim().is_empty() => Some("payload must not be an empty string"),
        Value::Object(map) if map.is_empty() => Some("payload must not be an empty object"),
        Value::Array(items) if items.is_empty() => Some("payload must not be an empty array"),
        _ => None,
    }
}

/// An immutable entry in a channel's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub channel: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Message {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_ms)
    }
}

/// A message about to be appended; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub channel: String,
    pub payload: Value,
    pub sender: Option<String>,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub count: u64,
    pub last_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_validation() {
        assert_eq!(validate_channel(" builds/main ").unwrap(), "builds/main");
        assert_eq!(validate_channel(""), Err(ChannelError::Empty));
        assert_eq!(
            validate_channel("has space"),
            Err(ChannelError::InvalidCharacters)
        );
    }

    #[test]
    fn test_payload_rules() {
        assert!(payload_problem(&json!(null)).is_some());
        assert!(payload_problem(&json!("")).is_some());
        assert!(payload_problem(&json!("  \n\t")).is_some());
        assert!(payload_problem(&json!("hello")).is_none());
        assert!(payload_problem(&json!({"k": 1})).is_none());
        assert!(payload_problem(&json!({})).is_some());
        assert!(payload_problem(&json!([])).is_some());
        assert!(payload_problem(&json!([null])).is_none());
        assert!(payload_problem(&json!(0)).is_none());
        assert!(payload_problem(&json!(false)).is_none());
    }
}
