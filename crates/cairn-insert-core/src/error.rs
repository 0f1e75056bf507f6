//! Error types shared by the insert engine.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failure reported for an insert attempt.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsertError {
    /// An engine invariant did not hold; retrying cannot help.
    #[error("internal insert error")]
    Internal {
        /// Description of the broken invariant.
        detail: String,
    },
    /// The data handle could not be read.
    #[error("insert source unreadable")]
    SourceUnreadable {
        /// Description of the read failure.
        detail: String,
    },
    /// The insert was cancelled before it completed.
    #[error("insert cancelled")]
    Cancelled,
    /// The inserter exhausted its retry budget.
    #[error("insert retry limit exceeded")]
    RetryLimitExceeded {
        /// Number of attempts made.
        attempts: u32,
    },
    /// Network or protocol failure passed through from the inserter.
    #[error("insert network failure")]
    Network {
        /// Failure description supplied by the inserter.
        detail: String,
        /// Whether the inserter considers the failure worth retrying.
        retryable: bool,
    },
}

impl InsertError {
    /// Build an [`InsertError::Internal`] from any displayable detail.
    #[must_use]
    pub fn internal(detail: impl ToString) -> Self {
        Self::Internal {
            detail: detail.to_string(),
        }
    }

    /// Build an [`InsertError::SourceUnreadable`] from any displayable detail.
    #[must_use]
    pub fn source_unreadable(detail: impl ToString) -> Self {
        Self::SourceUnreadable {
            detail: detail.to_string(),
        }
    }

    /// Stable discriminator used in notifications and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Internal { .. } => "internal",
            Self::SourceUnreadable { .. } => "source_unreadable",
            Self::Cancelled => "cancelled",
            Self::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            Self::Network { .. } => "network",
        }
    }

    /// Whether a fresh attempt could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Internal { .. } | Self::SourceUnreadable { .. } | Self::RetryLimitExceeded { .. } => {
                false
            }
            Self::Cancelled => true,
            Self::Network { retryable, .. } => *retryable,
        }
    }

    /// Human readable detail carried alongside the kind.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Internal { detail }
            | Self::SourceUnreadable { detail }
            | Self::Network { detail, .. } => detail.clone(),
            Self::Cancelled => "cancelled by request".to_string(),
            Self::RetryLimitExceeded { attempts } => format!("gave up after {attempts} attempts"),
        }
    }
}

/// A live request already holds the identifier within the client scope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("request identifier already in use")]
pub struct CollisionError {
    /// Client scope that owns the existing request.
    pub client: String,
    /// Identifier that collided.
    pub identifier: String,
}

/// A persisted record could not be turned back into a live request.
#[derive(Debug, Error)]
pub enum PersistenceParseError {
    /// The document is not structurally valid.
    #[error("persisted record is malformed")]
    Malformed {
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// A required field is absent.
    #[error("persisted field missing")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
    /// A field is present but carries an unusable value.
    #[error("persisted field invalid")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// The record was written by an unknown schema version.
    #[error("persisted schema version unsupported")]
    UnsupportedVersion {
        /// Version found in the document.
        found: u32,
    },
    /// The temporary source no longer holds the expected number of bytes.
    #[error("temporary source size mismatch")]
    SizeMismatch {
        /// Size recorded in the document.
        expected: u64,
        /// Size recovered from the backing file.
        actual: u64,
    },
    /// The temporary source backing file cannot be inspected.
    #[error("temporary source unavailable")]
    TempUnavailable {
        /// Backing file that could not be inspected.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
}

/// The redirect descriptor could not be encoded or decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    /// A length-prefixed field exceeds the encodable size.
    #[error("descriptor field too long")]
    FieldTooLong {
        /// Field that overflowed.
        field: &'static str,
        /// Length of the rejected value.
        len: usize,
    },
    /// The redirect target is empty.
    #[error("descriptor target empty")]
    EmptyTarget,
    /// The input is not a redirect descriptor.
    #[error("descriptor malformed")]
    Malformed {
        /// Decoding step that failed.
        operation: &'static str,
    },
}

/// Failure staging or releasing engine-owned temporary data.
#[derive(Debug, Error)]
pub enum TempStoreError {
    /// Filesystem operation failed.
    #[error("temp store io failure")]
    Io {
        /// Operation being attempted.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: io::Error,
    },
    /// Sealing or opening the encrypted envelope failed.
    #[error("temp store crypto failure")]
    Crypto {
        /// Operation being attempted.
        operation: &'static str,
    },
}

/// Invalid value supplied for a domain type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The insert identifier has no key type prefix.
    #[error("insert uri invalid")]
    InvalidUri {
        /// Rejected value.
        value: String,
    },
    /// The priority class is outside the supported range.
    #[error("priority class out of range")]
    PriorityOutOfRange {
        /// Rejected value.
        value: u8,
    },
}
