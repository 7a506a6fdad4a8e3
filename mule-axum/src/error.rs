use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mule_broker::BrokerError;
use serde_json::json;

/// Broker errors carried across the HTTP boundary.
///
/// Workers must treat every 409 the same way: the broker has moved on from
/// their lease, whatever the precise reason.
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        if self.0.is_lease_conflict() {
            return StatusCode::CONFLICT;
        }
        match &self.0 {
            BrokerError::JobNotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::ReservationInFlight(_) => StatusCode::CONFLICT,
            BrokerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self.status() {
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::CONFLICT => "conflict",
            StatusCode::BAD_REQUEST => "malformed_request",
            _ => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
