// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named mutual-exclusion lease. The row exists only while held; once
/// `expires_at` passes it is treated as absent even before it is swept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub name: String,
    pub owner: String,
    pub acquired_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Lock {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.expires_at - now_ms).max(0)
    }
}

/// Outcome of the store's atomic acquire.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireResult {
    Acquired(Lock),
    /// Someone else holds an unexpired lease.
    Held(Lock),
}

/// Outcome of a conditional release or extend.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedUpdate {
    Applied(Lock),
    NotOwner(Lock),
    Missing,
}
