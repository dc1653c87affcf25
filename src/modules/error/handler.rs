// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::{code::ErrorCode, ApiError, ApiErrorResponse, MailTrailError};
use poem::IntoResponse;
use poem_openapi::payload::Json;

/// Maps framework-level rejections (bad path, bad payload, wrong method)
/// onto the same JSON envelope application errors use, so clients never
/// see a bare poem error body.
pub async fn error_handler(error: poem::Error) -> impl poem::IntoResponse {
    if error.is::<MailTrailError>() {
        return error.into_response();
    }

    let Some(code) = classify(&error) else {
        return error.into_response();
    };

    let body = ApiError::new(error.to_string(), code as u32);
    let mut response = ApiErrorResponse::Generic(code.status(), Json(body)).into_response();
    // poem already picked the right HTTP status (404 vs 405 vs 400); keep it.
    response.set_status(error.status());
    response
}

fn classify(error: &poem::Error) -> Option<ErrorCode> {
    if error.is::<poem::error::NotFoundError>() {
        return Some(ErrorCode::ResourceNotFound);
    }
    if error.is::<poem::error::MethodNotAllowedError>() {
        return Some(ErrorCode::MethodNotAllowed);
    }
    let parse_failure = error.is::<poem::error::ParsePathError>()
        || error.is::<poem::error::ParseTypedHeaderError>()
        || error.is::<poem::error::ParseQueryError>()
        || error.is::<poem::error::ParseJsonError>()
        || error.is::<poem_openapi::error::ParseRequestPayloadError>()
        || error.is::<poem_openapi::error::ContentTypeError>()
        || error.is::<poem_openapi::error::ParseParamError>()
        || error.is::<poem_openapi::error::ParsePathError>();
    if parse_failure {
        return Some(ErrorCode::InvalidParameter);
    }
    error.has_source().then_some(ErrorCode::UnhandledPoemError)
}
