//! Error types for the elastic agent engine.

use serde::Serialize;
use thiserror::Error;

use crate::cluster::ClusterError;

/// A missing or malformed property or setting.
///
/// Serialises as `{"key": ..., "message": ...}`, the shape the server
/// expects validation results in.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{key}: {message}")]
pub struct ValidationError {
    pub key: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by [`crate::AgentInstances`].
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The request was rejected before anything was created.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The cluster platform call failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The server's agent list could not be read.
    #[error("failed to fetch known agents: {0}")]
    Directory(String),
}

impl InstanceError {
    /// Returns the validation error, if that is what this is.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            InstanceError::Validation(e) => Some(e),
            InstanceError::Cluster(_) | InstanceError::Directory(_) => None,
        }
    }
}

/// Result type for engine operations.
pub type InstanceResult<T> = Result<T, InstanceError>;
