use std::{
    num::NonZeroU32,
    sync::LazyLock,
    time::{Duration, Instant},
};

use governor::{
    clock::{QuantaClock, QuantaInstant},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use poem::{
    http::{header, Method},
    web::RealIp,
    Endpoint, FromRequest, IntoResponse, Middleware, Request, Response, Result,
};
use poem_openapi::OperationId;
use tracing::{error, info, warn, Instrument};

use crate::modules::metrics::{
    MAILTRAIL_REQUEST_DURATION_BY_METHOD_AND_OPERATION, MAILTRAIL_REQUEST_DURATION_BY_STATUS,
    MAILTRAIL_REQUEST_TOTAL_BY_METHOD_AND_OPERATION,
};

/// Machine-dominated paths: pixel fetches from mail clients and scanners,
/// scrape targets, the docs UI. They skip the per-request log line (the pixel
/// handler records its own outcome) but still feed the latency metrics.
const QUIET_PATHS: [&str; 3] = ["/track-email-open", "/metrics", "/api/status"];

fn is_quiet(path: &str) -> bool {
    QUIET_PATHS.contains(&path) || path.starts_with("/api-docs")
}

type DirectLimiter =
    RateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

static LOG_BUDGET: LazyLock<LogBudget> = LazyLock::new(LogBudget::new);

/// Global budget on request log lines. Every line spends quota and errors
/// spend the least, so under a flood the errors are what survive.
struct LogBudget {
    limiter: DirectLimiter,
}

impl LogBudget {
    fn new() -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap())),
        }
    }

    fn grants(&self, status: u16) -> bool {
        let cost = match status {
            500.. => 1,
            400..=499 => 3,
            _ => 5,
        };
        self.limiter.check_n(NonZeroU32::new(cost).unwrap()).is_ok()
    }
}

/// Request logging plus the HTTP-level metrics, in one middleware so the
/// duration they report is measured once.
#[derive(Default)]
pub struct RequestLog;

impl<E: Endpoint> Middleware<E> for RequestLog {
    type Output = RequestLogEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        RequestLogEndpoint { inner: ep }
    }
}

pub struct RequestLogEndpoint<E> {
    inner: E,
}

impl<E: Endpoint> Endpoint for RequestLogEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let quiet = is_quiet(&path);

        let span = if quiet {
            tracing::Span::none()
        } else {
            let remote_addr = match RealIp::from_request_without_body(&req).await {
                Ok(RealIp(Some(addr))) => addr.to_string(),
                _ => req.remote_addr().to_string(),
            };
            let query = req.uri().query().map(str::to_string);
            tracing::info_span!(
                "request",
                remote_addr = %remote_addr,
                method = %method,
                path = %path,
                query = ?query,
                user_agent = ?header_value(&req, header::USER_AGENT),
                content_length = ?header_value(&req, header::CONTENT_LENGTH),
            )
        };

        async move {
            let started = Instant::now();
            let res = self.inner.call(req).await;
            let elapsed = started.elapsed();

            match res {
                Ok(resp) => {
                    let resp = resp.into_response();
                    let status = resp.status().as_u16();
                    observe_request(&method, &resp, status, elapsed);
                    if !quiet {
                        log_response(status, elapsed);
                    }
                    Ok(resp)
                }
                Err(err) => {
                    let status = err.status().as_u16();
                    if !quiet {
                        log_response(status, elapsed);
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn header_value(req: &Request, name: header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Duration-by-status covers every response, the pixel included; the
/// per-operation series exist only for OpenAPI routes, which are the only
/// ones carrying an `OperationId`.
fn observe_request(method: &Method, resp: &Response, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    MAILTRAIL_REQUEST_DURATION_BY_STATUS
        .with_label_values(&[status_label.as_str()])
        .observe(elapsed.as_secs_f64());
    if let Some(operation_id) = resp.data::<OperationId>() {
        MAILTRAIL_REQUEST_DURATION_BY_METHOD_AND_OPERATION
            .with_label_values(&[method.as_str(), operation_id.0, status_label.as_str()])
            .observe(elapsed.as_secs_f64());
        MAILTRAIL_REQUEST_TOTAL_BY_METHOD_AND_OPERATION
            .with_label_values(&[method.as_str(), operation_id.0, status_label.as_str()])
            .inc();
    }
}

fn log_response(status: u16, duration: Duration) {
    if !LOG_BUDGET.grants(status) {
        return;
    }
    match status {
        500.. => error!(status, ?duration, "request ended in server error"),
        400..=499 => warn!(status, ?duration, "request rejected"),
        _ => info!(status, ?duration, "request served"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_paths_cover_machine_traffic() {
        assert!(is_quiet("/track-email-open"));
        assert!(is_quiet("/metrics"));
        assert!(is_quiet("/api-docs/swagger"));
        assert!(!is_quiet("/api/v1/send-email"));
        assert!(!is_quiet("/api/v1/emails"));
    }
}
