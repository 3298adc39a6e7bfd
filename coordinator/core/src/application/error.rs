// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::borrow::Cow;

use thiserror::Error;
use tracing::error;

use crate::domain::repository::RepositoryError;

/// Failure taxonomy shared by every coordination operation.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("invalid {field}: {reason}")]
    Validation {
        field: Cow<'static, str>,
        reason: String,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinationError {
    pub fn validation(field: impl Into<Cow<'static, str>>, reason: impl ToString) -> Self {
        CoordinationError::Validation {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable kind
    pub fn code(&self) -> &'static str {
        match self {
            CoordinationError::Validation { .. } => "validation",
            CoordinationError::Conflict(_) => "conflict",
            CoordinationError::NotFound(_) => "not_found",
            CoordinationError::Forbidden(_) => "forbidden",
            CoordinationError::Internal(_) => "internal",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            CoordinationError::Validation { field, .. } => Some(field.as_ref()),
            _ => None,
        }
    }
}

impl From<RepositoryError> for CoordinationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => CoordinationError::NotFound(what),
            RepositoryError::Conflict(what) => CoordinationError::Conflict(what),
            RepositoryError::Database(_) | RepositoryError::Serialization(_) => {
                error!(error = %err, "Store operation failed");
                CoordinationError::Internal(err.to_string())
            }
        }
    }
}

pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_errors_map_to_taxonomy() {
        let conflict: CoordinationError = RepositoryError::Conflict("port".into()).into();
        assert_eq!(conflict.code(), "conflict");

        let missing: CoordinationError = RepositoryError::NotFound("svc".into()).into();
        assert_eq!(missing.code(), "not_found");

        let db: CoordinationError = RepositoryError::Database("disk I/O".into()).into();
        assert_eq!(db.code(), "internal");
    }

    #[test]
    fn test_validation_names_field() {
        let err = CoordinationError::validation("ttl", "must be positive");
        assert_eq!(err.field(), Some("ttl"));
        assert_eq!(err.to_string(), "invalid ttl: must be positive");
    }
}
