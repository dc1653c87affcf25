// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use poem::http::StatusCode;
use poem_openapi::Enum;

#[derive(Copy, Clone, Debug, Enum, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    // 10xxx: the request or configuration is wrong
    InvalidParameter = 10000,
    MissingConfiguration = 10010,
    ExceedsLimitation = 10020,
    MethodNotAllowed = 10040,

    // 20xxx: credentials rejected upstream
    UpstreamAuthFailed = 20010,

    // 30xxx: lookups that found nothing
    ResourceNotFound = 30000,

    // 40xxx: transport-level failures
    NetworkError = 40000,
    ConnectionTimeout = 40010,

    // 50xxx: Graph mail operations
    MailSendFailed = 50000,
    MailboxFetchFailed = 50010,

    // 70xxx: faults on our side
    InternalError = 70000,
    UnhandledPoemError = 70010,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidParameter
            | ErrorCode::MissingConfiguration
            | ErrorCode::ExceedsLimitation => StatusCode::BAD_REQUEST,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::UpstreamAuthFailed
            | ErrorCode::MailSendFailed
            | ErrorCode::MailboxFetchFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError
            | ErrorCode::NetworkError
            | ErrorCode::ConnectionTimeout
            | ErrorCode::UnhandledPoemError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
