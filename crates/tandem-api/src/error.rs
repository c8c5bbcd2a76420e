use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use tandem_core::Error;

/// Handler error: a core failure with a meaningful status code, or an
/// internal fault that only surfaces as 500.
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Core(e) => match e {
                Error::Unauthenticated | Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
                Error::AlreadyPaired
                | Error::SelfPairing
                | Error::CodeAlreadyUsed
                | Error::EmailTaken => StatusCode::CONFLICT,
                Error::InvalidCode => StatusCode::NOT_FOUND,
                Error::InvalidProfile(_) => StatusCode::BAD_REQUEST,
                Error::ProfileNotFound => StatusCode::INTERNAL_SERVER_ERROR,
                Error::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(e) => write!(f, "{}", e),
            Self::Internal(_) => f.write_str("internal server error"),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Core(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            match &self {
                Self::Core(e) => error!("request failed: {}", e),
                Self::Internal(e) => error!("request failed: {:#}", e),
            }
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
