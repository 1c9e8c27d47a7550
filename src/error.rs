/// Error taxonomy shared by the core services and the HTTP layer

use thiserror::Error;

use crate::core::update::UpdateStep;

pub type Result<T, E = DashboardError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Update of {container} failed at step {step}: {reason}")]
    PartialFailure {
        container: String,
        step: UpdateStep,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DashboardError {
    /// Short machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            DashboardError::InvalidArgument(_) => "invalid_argument",
            DashboardError::NotFound(_) => "not_found",
            DashboardError::InvalidState(_) => "invalid_state",
            DashboardError::UpstreamUnavailable(_) => "upstream_unavailable",
            DashboardError::PartialFailure { .. } => "partial_failure",
            DashboardError::Storage(_) => "storage",
            DashboardError::Config(_) => "config",
        }
    }

    pub fn timeout(what: &str, after: std::time::Duration) -> Self {
        DashboardError::UpstreamUnavailable(format!(
            "{} timed out after {}s",
            what,
            after.as_secs()
        ))
    }
}

impl From<std::io::Error> for DashboardError {
    fn from(err: std::io::Error) -> Self {
        DashboardError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(err: serde_json::Error) -> Self {
        DashboardError::Storage(format!("JSON serialization error: {err}"))
    }
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DashboardError::UpstreamUnavailable(format!("request timed out: {err}"))
        } else {
            DashboardError::UpstreamUnavailable(err.to_string())
        }
    }
}
