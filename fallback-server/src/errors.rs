use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fallback_core::FallbackError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Set for the 403-at-capacity case (spec.md §4.4 step 3): callers may
    /// want to surface a redirect hint alongside the rejection.
    pub redirect: bool,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            redirect: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>, redirect: bool) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
            redirect,
        }
    }

    pub fn range_not_satisfiable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::RANGE_NOT_SATISFIABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
                "redirect": self.redirect,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<FallbackError> for AppError {
    fn from(err: FallbackError) -> Self {
        match err {
            FallbackError::NotFound(m) => Self::not_found(m),
            FallbackError::Forbidden { message, redirect } => Self::forbidden(message, redirect),
            FallbackError::RangeNotSatisfiable => Self::range_not_satisfiable(err.to_string()),
            FallbackError::BadRequest(m) => Self::bad_request(m),
            FallbackError::FormatMismatch => Self::not_found(err.to_string()),
            FallbackError::WouldBlock => Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
