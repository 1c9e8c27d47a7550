/// Response envelope shared by every endpoint
///
/// Success and error bodies both carry `code`, `message` and an RFC 3339
/// `timestamp`; the payload fields sit next to them at the top level.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

use crate::core::update::UpdateStep;
use crate::error::DashboardError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    code: u16,
    message: String,
    timestamp: String,
    #[serde(flatten)]
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::with_status(StatusCode::OK, message, data)
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
            data,
        }
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<UpdateStep>,
}

/// Error envelope with an arbitrary status
pub fn error_response(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Response {
    ApiResponse::with_status(status, message, ErrorBody { error: kind, step: None }).into_response()
}

pub fn status_for(err: &DashboardError) -> StatusCode {
    match err {
        DashboardError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        DashboardError::NotFound(_) => StatusCode::NOT_FOUND,
        DashboardError::InvalidState(_) => StatusCode::CONFLICT,
        DashboardError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        DashboardError::PartialFailure { .. }
        | DashboardError::Storage(_)
        | DashboardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "request rejected");
        }

        let step = match &self {
            DashboardError::PartialFailure { step, .. } => Some(*step),
            _ => None,
        };

        ApiResponse::with_status(
            status,
            self.to_string(),
            ErrorBody {
                error: self.kind(),
                step,
            },
        )
        .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&DashboardError::InvalidArgument("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&DashboardError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&DashboardError::InvalidState("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&DashboardError::UpstreamUnavailable("x".into())),
            StatusCode::BAD_GATEWAY
        );
        let partial = DashboardError::PartialFailure {
            container: "web".into(),
            step: UpdateStep::Creating,
            reason: "boom".into(),
        };
        assert_eq!(status_for(&partial), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_envelope_flattens_payload() {
        #[derive(Serialize)]
        struct Payload {
            container_id: String,
        }

        let body = ApiResponse::ok("started", Payload { container_id: "abc".into() });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["message"], "started");
        assert_eq!(json["container_id"], "abc");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
