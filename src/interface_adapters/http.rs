// HTTP responses for refused WebSocket upgrades.

use crate::use_cases::AdmissionError;
use axum::{Json, http::StatusCode};

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    // Human-readable reason the upgrade was refused.
    pub error: String,
}

/// Maps an admission failure to the status and JSON body sent instead of upgrading.
pub fn rejection(err: &AdmissionError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, reason) = match err {
        AdmissionError::DuplicateIp => (StatusCode::FORBIDDEN, "duplicate ip"),
        AdmissionError::Quit => (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down"),
    };
    (
        status,
        Json(ErrorResponse {
            error: reason.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_ip_is_duplicate_then_upgrade_is_forbidden() {
        let (status, Json(body)) = rejection(&AdmissionError::DuplicateIp);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error, "duplicate ip");
    }

    #[test]
    fn when_broker_has_quit_then_upgrade_is_unavailable() {
        let (status, _) = rejection(&AdmissionError::Quit);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
