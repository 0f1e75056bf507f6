//! Errors raised while creating, restoring or managing requests.

use cairn_insert_core::{CollisionError, PersistenceParseError, TempStoreError};
use cairn_runtime::StoreError;
use thiserror::Error;

/// A fresh request could not be accepted.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The identifier is already live in the client scope.
    #[error("request identifier collision")]
    Collision(#[from] CollisionError),
    /// Direct data could not be staged into temporary storage.
    #[error("failed to stage request data")]
    Stage(#[from] TempStoreError),
}

/// A persisted request could not be brought back.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The stored document is not a valid record.
    #[error("persisted request could not be parsed")]
    Parse(#[from] PersistenceParseError),
    /// A live request already holds the identifier.
    #[error("persisted request collides with a live request")]
    Collision(#[from] CollisionError),
}

/// The request store could not be read during restore.
#[derive(Debug, Error)]
#[error("failed to load persisted requests")]
pub struct LoadError {
    /// Underlying store failure.
    #[from]
    pub source: StoreError,
}
