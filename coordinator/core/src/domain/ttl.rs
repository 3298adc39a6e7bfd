// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! TTL input parsing.
//!
//! Clients send TTLs either as a JSON number of milliseconds or as a string
//! (`"1500"`, `"30s"`, `"5m"`). Callers decide what an invalid value means:
//! services reject it, locks fall back to their default.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TtlError {
    #[error("ttl must be a positive number of milliseconds or a duration string")]
    WrongType,

    #[error("ttl must be greater than zero")]
    NotPositive,

    #[error("ttl must be a whole number of milliseconds")]
    Fractional,

    #[error("ttl '{0}' is not a recognised duration")]
    Unparseable(String),

    #[error("ttl is too large")]
    Overflow,
}

/// A validated, strictly positive duration in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ttl(i64);

/// Upper bound keeps `now + ttl` far away from i64 overflow.
const MAX_TTL_MS: i64 = 10 * 365 * 24 * 60 * 60 * 1000;

impl Ttl {
    pub fn from_millis(ms: i64) -> Result<Self, TtlError> {
        if ms <= 0 {
            return Err(TtlError::NotPositive);
        }
        if ms > MAX_TTL_MS {
            return Err(TtlError::Overflow);
        }
        Ok(Self(ms))
    }

    /// Parse a TTL from an untyped JSON value.
    pub fn parse(value: &Value) -> Result<Self, TtlError> {
        match value {
            Value::Number(n) => {
                if let Some(ms) = n.as_i64() {
                    return Self::from_millis(ms);
                }
                if n.as_u64().is_some() {
                    return Err(TtlError::Overflow);
                }
                match n.as_f64() {
                    Some(f) if f <= 0.0 => Err(TtlError::NotPositive),
                    Some(f) if f.fract() != 0.0 => Err(TtlError::Fractional),
                    _ => Err(TtlError::Overflow),
                }
            }
            Value::String(s) => Self::parse_str(s),
            _ => Err(TtlError::WrongType),
        }
    }

    pub fn parse_str(raw: &str) -> Result<Self, TtlError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(TtlError::Unparseable(raw.to_string()));
        }
        if s.starts_with('-') {
            return Err(TtlError::NotPositive);
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            let ms: i64 = s.parse().map_err(|_| TtlError::Overflow)?;
            return Self::from_millis(ms);
        }
        let duration = humantime::parse_duration(s)
            .map_err(|_| TtlError::Unparseable(raw.to_string()))?;
        let ms = i64::try_from(duration.as_millis()).map_err(|_| TtlError::Overflow)?;
        Self::from_millis(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Absolute expiry for a record created at `now_ms`.
    pub fn expires_at(&self, now_ms: i64) -> i64 {
        now_ms.saturating_add(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(Ttl::parse(&json!(1000)).unwrap().as_millis(), 1000);
        assert_eq!(Ttl::parse(&json!(0)), Err(TtlError::NotPositive));
        assert_eq!(Ttl::parse(&json!(-5)), Err(TtlError::NotPositive));
        assert_eq!(Ttl::parse(&json!(1.5)), Err(TtlError::Fractional));
        assert_eq!(Ttl::parse(&json!(-0.5)), Err(TtlError::NotPositive));
    }

    #[test]
    fn test_parse_strings() {
        assert_eq!(Ttl::parse(&json!("2500")).unwrap().as_millis(), 2500);
        assert_eq!(Ttl::parse(&json!("30s")).unwrap().as_millis(), 30_000);
        assert_eq!(Ttl::parse(&json!("5m")).unwrap().as_millis(), 300_000);
        assert_eq!(Ttl::parse(&json!("-10")), Err(TtlError::NotPositive));
        assert!(matches!(
            Ttl::parse(&json!("soon")),
            Err(TtlError::Unparseable(_))
        ));
        assert!(matches!(Ttl::parse(&json!("")), Err(TtlError::Unparseable(_))));
    }

    #[test]
    fn test_parse_rejects_other_types() {
        assert_eq!(Ttl::parse(&json!(null)), Err(TtlError::WrongType));
        assert_eq!(Ttl::parse(&json!(true)), Err(TtlError::WrongType));
        assert_eq!(Ttl::parse(&json!([1000])), Err(TtlError::WrongType));
    }

    #[test]
    fn test_expiry_is_strictly_after_creation() {
        let ttl = Ttl::from_millis(1).unwrap();
        assert!(ttl.expires_at(100) > 100);
        assert_eq!(Ttl::from_millis(MAX_TTL_MS + 1), Err(TtlError::Overflow));
    }
}
