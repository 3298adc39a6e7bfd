// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Semantic service identities (`project:stack:context`) and glob patterns
//! over them.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const MAX_IDENTITY_LEN: usize = 200;
const MAX_SEGMENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity must not be empty")]
    Empty,

    #[error("identity is longer than 200 characters")]
    TooLong,

    #[error("identity has more than 3 segments")]
    TooManySegments,

    #[error("identity contains an empty segment")]
    EmptySegment,

    #[error("identity segment '{0}' contains characters outside [a-z0-9._-]")]
    InvalidSegment(String),
}

fn segment_char_ok(c: char, allow_glob: bool) -> bool {
    c.is_ascii_lowercase()
        || c.is_ascii_digit()
        || matches!(c, '.' | '_' | '-')
        || (allow_glob && c == '*')
}

fn normalize(raw: &str, allow_glob: bool) -> Result<(String, Vec<String>), IdentityError> {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(IdentityError::Empty);
    }
    if normalized.len() > MAX_IDENTITY_LEN {
        return Err(IdentityError::TooLong);
    }
    let segments: Vec<String> = normalized.split(':').map(str::to_string).collect();
    if segments.len() > MAX_SEGMENTS {
        return Err(IdentityError::TooManySegments);
    }
    for segment in &segments {
        if segment.is_empty() {
            return Err(IdentityError::EmptySegment);
        }
        if !segment.chars().all(|c| segment_char_ok(c, allow_glob)) {
            return Err(IdentityError::InvalidSegment(segment.clone()));
        }
    }
    Ok((normalized, segments))
}

/// Case-normalised `project[:stack[:context]]` identity of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceIdentity(String);

impl ServiceIdentity {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let (normalized, _) = normalize(raw, false)?;
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':')
    }

    pub fn project(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    /// Stable 64-bit digest used to pick the first port candidate.
    pub fn stable_hash(&self) -> u64 {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServiceIdentity> for String {
    fn from(value: ServiceIdentity) -> Self {
        value.0
    }
}

/// Glob pattern over identities.
///
/// `*` inside a segment matches any run of characters in that segment. A
/// trailing `*` segment also swallows every remaining segment, so `app:*`
/// covers `app`, `app:api` and `app:api:main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPattern {
    raw: String,
    segments: Vec<String>,
}

impl IdentityPattern {
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let (normalized, segments) = normalize(raw, true)?;
        Ok(Self {
            raw: normalized,
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_exact(&self) -> bool {
        !self.raw.contains('*')
    }

    pub fn matches(&self, identity: &ServiceIdentity) -> bool {
        let target: Vec<&str> = identity.segments().collect();
        let last = self.segments.len() - 1;

        for (i, pattern) in self.segments.iter().enumerate() {
            if i == last && pattern == "*" {
                return target.len() >= i;
            }
            match target.get(i) {
                Some(segment) if glob_match(pattern, segment) => {}
                _ => return false,
            }
        }
        target.len() == self.segments.len()
    }
}

impl fmt::Display for IdentityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Single-segment glob where `*` matches any (possibly empty) run.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ti;
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
