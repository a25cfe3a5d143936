use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;
use thiserror::Error as ThisError;

use crate::responses::json_response;

/// Failures of the attendance accounting step.
///
/// `ReferrerNotFound` is a warning: the attendance increment still commits and
/// the marking user is never shown it.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum AccountingError {
    #[error("attendance already marked for {volunteer_id} on {date} at {camp}")]
    DuplicateAttendance {
        volunteer_id: String,
        date: String,
        camp: String,
    },

    #[error("volunteer profile {0} not found")]
    ProfileNotFound(String),

    #[error("attendance total for {0} cannot be increased further")]
    CounterOverflow(String),

    #[error("referrer profile {referrer_id} not found for volunteer {volunteer_id}")]
    ReferrerNotFound {
        volunteer_id: String,
        referrer_id: String,
    },
}

/// Request-level failures rendered as `{"error", "message"}` bodies
#[derive(ThisError, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Missing caller identity")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "InvalidRequest",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
        }
    }

    pub fn into_response(self) -> Result<Response<Body>, Error> {
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        json_response(self.status(), &body)
    }
}

impl From<AccountingError> for ApiError {
    fn from(err: AccountingError) -> Self {
        match err {
            AccountingError::DuplicateAttendance { .. } => ApiError::Conflict(
                "Attendance already marked for this volunteer, date, and camp.".to_string(),
            ),
            AccountingError::ProfileNotFound(_) => {
                ApiError::NotFound("Volunteer profile not found".to_string())
            }
            AccountingError::CounterOverflow(_) => {
                ApiError::Conflict("Attendance total cannot be increased further.".to_string())
            }
            // Only reachable if a caller escalates the warning
            AccountingError::ReferrerNotFound { .. } => {
                ApiError::NotFound("Referrer profile not found".to_string())
            }
        }
    }
}
