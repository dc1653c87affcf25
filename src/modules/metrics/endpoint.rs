// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use poem::{
    http::{Method, StatusCode},
    Endpoint, Request, Response, Result,
};
use prometheus::{default_registry, Encoder, TextEncoder};

/// Text-format scrape endpoint serving everything registered on the default
/// registry, which is where all the delivery and tracking counters live.
pub struct PrometheusEndpoint;

impl Endpoint for PrometheusEndpoint {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        if req.method() != Method::GET {
            return Ok(StatusCode::METHOD_NOT_ALLOWED.into());
        }
        let families = default_registry().gather();
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|_| poem::Error::from(StatusCode::INTERNAL_SERVER_ERROR))?;
        Ok(Response::builder()
            .content_type(encoder.format_type())
            .body(buf))
    }
}
