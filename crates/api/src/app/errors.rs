use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use trustgate_auth::{Deny, VerifyError};
use trustgate_infra::{BrokerError, IssueError};

/// Error body shared by every endpoint: `{status, error, message, path}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(serialize_with = "status_code")]
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
    pub path: String,
}

fn status_code<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            status,
            error: status.canonical_reason().unwrap_or("Error"),
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, path)
    }

    pub fn forbidden(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message, path)
    }

    pub fn bad_request(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, path)
    }

    pub fn from_verify(err: &VerifyError, path: &str) -> Self {
        Self::unauthorized(err.to_string(), path)
    }

    pub fn from_deny(deny: Deny, path: &str) -> Self {
        match deny {
            Deny::Unauthenticated => Self::unauthorized(deny.to_string(), path),
            Deny::Forbidden => Self::forbidden(deny.to_string(), path),
        }
    }

    pub fn from_issue(err: &IssueError, path: &str) -> Self {
        match err {
            IssueError::InvalidCredentials
            | IssueError::AccountDisabled
            | IssueError::AccountLocked
            | IssueError::InvalidRefreshToken(_)
            | IssueError::UnknownClient
            | IssueError::UnsupportedGrant => Self::unauthorized(err.to_string(), path),
            IssueError::InvalidScope(_) | IssueError::InvalidRegistration(_) => {
                Self::bad_request(err.to_string(), path)
            }
            IssueError::AlreadyRegistered => Self::new(StatusCode::CONFLICT, err.to_string(), path),
            IssueError::Store(e) => {
                tracing::error!(error = %e, "credential store unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "credential store unavailable", path)
            }
            IssueError::Hashing(e) => {
                tracing::error!(error = %e, "password hashing failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "registration failed", path)
            }
            IssueError::Signing(e) => {
                tracing::error!(error = %e, "token signing failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "token signing failed", path)
            }
        }
    }

    pub fn from_broker(err: &BrokerError, path: &str) -> Self {
        match err {
            BrokerError::Timeout(_) => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, err.to_string(), path)
            }
            _ => Self::new(StatusCode::BAD_GATEWAY, err.to_string(), path),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use trustgate_core::StoreError;

    use super::*;

    #[test]
    fn body_shape_matches_contract() {
        let err = ApiError::unauthorized("token has expired", "/api/orders");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": 401,
                "error": "Unauthorized",
                "message": "token has expired",
                "path": "/api/orders",
            })
        );
    }

    #[test]
    fn deny_maps_to_401_and_403() {
        let unauthenticated = ApiError::from_deny(Deny::Unauthenticated, "/x");
        assert_eq!(unauthenticated.status, StatusCode::UNAUTHORIZED);
        let forbidden = ApiError::from_deny(Deny::Forbidden, "/x");
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert_eq!(forbidden.error, "Forbidden");
    }

    #[test]
    fn store_outage_is_503_not_401() {
        let outage = IssueError::Store(StoreError::unavailable("down"));
        let err = ApiError::from_issue(&outage, "/api/auth/login");
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.message.contains("down"));
    }

    #[test]
    fn duplicate_registration_is_409() {
        let err = ApiError::from_issue(&IssueError::AlreadyRegistered, "/api/auth/register");
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.error, "Conflict");
    }

    #[test]
    fn broker_timeout_is_504() {
        let timeout = BrokerError::Timeout(std::time::Duration::from_secs(5));
        let err = ApiError::from_broker(&timeout, "/x");
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }
}
