// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::fmt::Formatter;

use code::ErrorCode;
use poem::http::StatusCode;
use poem_openapi::{payload::Json, ApiResponse, Object};
use snafu::{Location, Snafu};

pub mod code;
pub mod handler;

/// The one error type of the crate. Every failure carries a message, the
/// source location it was raised from, and an [`ErrorCode`] that decides
/// both the numeric `code` in the JSON body and the HTTP status.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MailTrailError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

pub type MailTrailResult<T, E = MailTrailError> = std::result::Result<T, E>;

/// Wire shape of every error body the REST surface returns.
#[derive(Debug, Clone, Object)]
pub struct ApiError {
    pub message: String,
    pub code: u32,
}

impl ApiError {
    pub fn new(message: impl Into<String>, code: u32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

impl From<MailTrailError> for ApiErrorResponse {
    fn from(error: MailTrailError) -> Self {
        let MailTrailError::Generic {
            message,
            location,
            code,
        } = error;
        tracing::error!(
            "request failed with {:?} at {}: {}",
            code,
            location,
            message
        );
        let body = ApiError::new(message, code as u32);
        ApiErrorResponse::Generic(code.status(), Json(body))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "api error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone, ApiResponse)]
pub enum ApiErrorResponse {
    Generic(StatusCode, Json<ApiError>),
}
