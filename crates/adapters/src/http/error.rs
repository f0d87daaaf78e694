use std::time::Duration;

use application::intake_service::IntakeRejection;
use axum::Json;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use domain::admission::entity::{AdmissionReason, Decision};
use domain::auth::error::AuthError;
use domain::common::error::DomainError;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub(crate) struct ErrorBody {
    error: ErrorDetail,
    /// Admission reason code, present only on 403/429 admission blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    reason: Option<&'static str>,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct ErrorDetail {
    /// Machine-readable error code (e.g. `SOURCE_NOT_FOUND`).
    #[schema(value_type = String)]
    code: &'static str,
    /// Human-readable description of the error.
    message: String,
}

/// Standard API error type.
///
/// All variants produce a JSON response matching:
/// `{"error":{"code":"SCREAMING_SNAKE","message":"human-readable"}}`.
/// Admission blocks add a top-level `reason`.
#[derive(Debug)]
pub enum ApiError {
    NotFound { code: &'static str, message: String },
    BadRequest { code: &'static str, message: String },
    Unauthorized { message: String },
    Forbidden { code: &'static str, message: String },
    Conflict { code: &'static str, message: String },
    PayloadTooLarge { message: String },
    /// Admission refused the request: 429 for rate limits, 500 for
    /// fail-closed engine or allowlist errors, 403 otherwise.
    Blocked {
        reason: AdmissionReason,
        retry_after: Option<Duration>,
    },
    Internal { message: String },
    ServiceUnavailable { message: String },
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "VALIDATION_ERROR",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_header = None;
        let mut reason_field = None;
        let (status, code, message) = match self {
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Unauthorized { message } => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_REQUIRED", message)
            }
            Self::Forbidden { code, message } => (StatusCode::FORBIDDEN, code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            Self::PayloadTooLarge { message } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", message)
            }
            Self::Blocked {
                reason,
                retry_after,
            } => {
                reason_field = Some(reason.as_str());
                let message = format!("admission blocked: {reason}");
                match reason {
                    AdmissionReason::RateLimit => {
                        retry_header = Some(retry_after.map_or(1, |d| d.as_secs().max(1)));
                        (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
                    }
                    AdmissionReason::InternalError | AdmissionReason::InvalidAllowlist => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "ADMISSION_ERROR", message)
                    }
                    _ => (StatusCode::FORBIDDEN, "ADMISSION_BLOCKED", message),
                }
            }
            Self::Internal { message } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
            }
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                message,
            ),
        };

        let mut response = (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
                reason: reason_field,
            }),
        )
            .into_response();
        if let Some(secs) = retry_header {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden(ref msg) => Self::Forbidden {
                code: "INSUFFICIENT_ROLE",
                message: msg.clone(),
            },
            _ => Self::Unauthorized {
                message: err.to_string(),
            },
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match &err {
            DomainError::NotFound(_) => Self::NotFound {
                code: "NOT_FOUND",
                message: err.to_string(),
            },
            DomainError::Duplicate(_) => Self::Conflict {
                code: "DUPLICATE",
                message: err.to_string(),
            },
            DomainError::Conflict(_) => Self::Conflict {
                code: "CONFLICT",
                message: err.to_string(),
            },
            DomainError::InvalidInput(_) | DomainError::InvalidConfig(_) => {
                Self::bad_request(err.to_string())
            }
            DomainError::Unavailable(_) => Self::ServiceUnavailable {
                message: err.to_string(),
            },
            DomainError::EngineError(_) => Self::Internal {
                message: err.to_string(),
            },
        }
    }
}

impl From<Decision> for ApiError {
    fn from(decision: Decision) -> Self {
        Self::Blocked {
            reason: decision.reason,
            retry_after: decision.retry_after,
        }
    }
}

impl From<IntakeRejection> for ApiError {
    fn from(rejection: IntakeRejection) -> Self {
        match rejection {
            IntakeRejection::Invalid(e) => Self::bad_request(e.to_string()),
            IntakeRejection::TooLarge(e) => Self::PayloadTooLarge {
                message: e.to_string(),
            },
            IntakeRejection::Blocked(decision) => decision.into(),
            IntakeRejection::Internal(message) => Self::Internal { message },
        }
    }
}
