//! API error taxonomy and its HTTP status mapping

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::ArtifactError;
use crate::definitions::DefinitionError;
use crate::executor::ExecutorError;
use crate::orchestrator::OrchestratorError;
use crate::storage::StoreError;
use crate::workerpool::PoolError;

/// Errors surfaced to the routing layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Malformed request or query; no state changed
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Storage, executor, or scheduler failure
    #[error("{0}")]
    Dependency(String),

    /// Definition store failure
    #[error("{0}")]
    BadGateway(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Dependency(_) => 500,
            ApiError::BadGateway(_) => 502,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "Bad Request",
            ApiError::NotFound(_) => "Not Found",
            ApiError::Dependency(_) => "Internal Server Error",
            ApiError::BadGateway(_) => "Bad Gateway",
        }
    }

    /// Problem document for the response body
    pub fn problem(&self) -> Problem {
        Problem {
            title: self.title().to_string(),
            status: self.status_code(),
            detail: self.to_string(),
        }
    }
}

/// JSON error body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::TestNotFound(_) => ApiError::NotFound(e.to_string()),
            OrchestratorError::Definitions(_) => ApiError::BadGateway(e.to_string()),
            OrchestratorError::InvalidRequest(_)
            | OrchestratorError::Pool(PoolError::InvalidConcurrency | PoolError::ConcurrencyTooHigh) => {
                ApiError::Validation(e.to_string())
            }
            OrchestratorError::Scheduler(_)
            | OrchestratorError::Pool(_)
            | OrchestratorError::JobFailed(_)
            | OrchestratorError::ExecutionFailed(_) => ApiError::Dependency(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            e => ApiError::Dependency(e.to_string()),
        }
    }
}

impl From<DefinitionError> for ApiError {
    fn from(e: DefinitionError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound(e.to_string())
        } else {
            ApiError::BadGateway(e.to_string())
        }
    }
}

impl From<ExecutorError> for ApiError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ExecutorError::NotRunning(_) => ApiError::Validation(e.to_string()),
            e => ApiError::Dependency(e.to_string()),
        }
    }
}

impl From<ArtifactError> for ApiError {
    fn from(e: ArtifactError) -> Self {
        match e {
            ArtifactError::NotFound(_) => ApiError::NotFound(e.to_string()),
            ArtifactError::InvalidName(_) => ApiError::Validation(e.to_string()),
            ArtifactError::Io(_) => ApiError::Dependency(e.to_string()),
        }
    }
}
