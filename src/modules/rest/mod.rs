// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::common::error::ErrorCapture;
use crate::modules::common::log::RequestLog;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::handler::error_handler;
use crate::modules::error::MailTrailResult;
use crate::modules::metrics::endpoint::PrometheusEndpoint;
use crate::modules::rest::public::status::get_status;
use crate::modules::rest::public::tracking::track_email_open;
use crate::modules::{settings::cli::SETTINGS, utils::shutdown::shutdown_signal};

use super::error::ApiErrorResponse;
use crate::raise_error;
use api::create_openapi_service;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::{CatchPanic, Compression};
use poem::{middleware::Cors, EndpointExt, Route, Server};
use poem_openapi::ContactObject;
use std::collections::HashSet;
use std::time::Duration;

pub mod api;
pub mod public;
pub mod response;

pub type ApiResult<T, E = ApiErrorResponse> = std::result::Result<T, E>;

const DESCRIPTION: &str = r#"
    MailTrail is a delivery lifecycle tracker for transactional CRM email.

    - Sends messages through the Microsoft Graph API and embeds an open-tracking pixel in each one.
    - Records opens with bot and prefetch filtering, and reconciles bounces by parsing provider non-delivery reports.
    - Threads mailbox replies back to the originating send, keeping per-email lifecycle state (sent, opened, bounced, replied).
"#;

pub async fn start_http_server() -> MailTrailResult<()> {
    let bind_ip = SETTINGS
        .mailtrail_bind_ip
        .clone()
        .unwrap_or_else(|| "0.0.0.0".into());
    let listener = TcpListener::bind((bind_ip, SETTINGS.mailtrail_http_port as u16));

    let api_service = create_openapi_service()
        .description(DESCRIPTION)
        .contact(ContactObject::new().email("support@mailtrail.dev"))
        .license("https://mailtrail.dev/license")
        .external_document("https://mailtrail.dev/docs")
        .summary("A delivery lifecycle tracker for CRM email sent through Microsoft Graph");

    let swagger = api_service.swagger_ui();
    let redoc = api_service.redoc();
    let scalar = api_service.scalar();
    let spec_json = api_service.spec_endpoint();
    let spec_yaml = api_service.spec_endpoint_yaml();
    let openapi_explorer = api_service.openapi_explorer();

    let open_api_route = Route::new()
        .nest_no_strip("/api/v1", api_service)
        .with(ErrorCapture);

    let cors_origins = if SETTINGS.mailtrail_cors_origins.is_empty() {
        HashSet::from(["*".to_string()])
    } else {
        SETTINGS.mailtrail_cors_origins.clone()
    };

    // The surface is read-and-trigger only; no resource is updated or
    // deleted over HTTP.
    let cors = Cors::new()
        .allow_origins(cors_origins)
        .allow_credentials(true)
        .allow_methods(vec!["GET", "POST", "OPTIONS", "HEAD"])
        .allow_headers(vec!["Content-Type"])
        .max_age(SETTINGS.mailtrail_cors_max_age);

    let route = Route::new()
        .nest("/api-docs/swagger", swagger)
        .nest("/api-docs/redoc", redoc)
        .nest("/api-docs/explorer", openapi_explorer)
        .nest("/api-docs/scalar", scalar)
        .nest("/api-docs/spec.json", spec_json)
        .nest("/api-docs/spec.yaml", spec_yaml)
        .nest("/metrics", PrometheusEndpoint)
        .at("/track-email-open", get(track_email_open))
        .nest("/api/status", get(get_status))
        .nest_no_strip("/api/v1", open_api_route)
        // RequestLog sits under Cors so preflights are answered before they
        // reach the request log; quiet paths still feed the histograms.
        .with(RequestLog)
        .with(cors)
        .with_if(
            SETTINGS.mailtrail_http_compression_enabled,
            Compression::new(),
        )
        .with(CatchPanic::new());

    let server = Server::new(listener)
        .name("MailTrail API Service")
        .idle_timeout(Duration::from_secs(60))
        .run_with_graceful_shutdown(
            route.catch_all_error(error_handler),
            shutdown_signal(),
            Some(Duration::from_secs(5)),
        );
    println!(
        "MailTrail API Service is now running on port {}.",
        SETTINGS.mailtrail_http_port
    );
    server
        .await
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
}
