// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use poem::{
    handler,
    http::header,
    web::{Query, RealIp},
    Request, Response,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::modules::{email::track::record_open, metrics::MAILTRAIL_PIXEL_REQUESTS_TOTAL};

/// 1x1 transparent GIF89a, served on every tracking request.
const TRACKING_PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, // GIF89a
    0x01, 0x00, 0x01, 0x00, // 1x1
    0x80, 0x00, 0x00, // global color table, 2 entries
    0x00, 0x00, 0x00, // black
    0xFF, 0xFF, 0xFF, // white
    0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, // GCE: index 0 transparent
    0x2C, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // image descriptor
    0x02, 0x02, 0x44, 0x01, 0x00, // image data
    0x3B, // trailer
];

#[derive(Debug, Deserialize)]
pub struct TrackQuery {
    id: Option<String>,
}

/// Serves the open-tracking pixel.
///
/// Always answers 200 with the GIF: mail clients must never see an error,
/// a redirect, or a body that varies with tracking state. Outcomes are
/// logged and counted only.
#[handler]
pub async fn track_email_open(
    query: Option<Query<TrackQuery>>,
    RealIp(ip): RealIp,
    req: &Request,
) -> Response {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    let email_id = query.as_ref().and_then(|q| parse_id(q.id.as_deref()));

    let outcome = match email_id {
        None => {
            warn!("Tracking request with missing or unparseable id");
            "bad_id"
        }
        Some(email_id) => {
            match record_open(email_id, ip.map(|i| i.to_string()), user_agent).await {
                Ok(outcome) => outcome.metric_label(),
                Err(error) => {
                    warn!(email_id, "Failed to record open: {error:?}");
                    "error"
                }
            }
        }
    };
    MAILTRAIL_PIXEL_REQUESTS_TOTAL
        .with_label_values(&[outcome])
        .inc();
    debug!(outcome, "Tracking pixel served");

    Response::builder()
        .content_type("image/gif")
        .header("Pragma", "no-cache")
        .header("Cache-Control", "no-cache, no-store, must-revalidate")
        .header("Expires", "0")
        .body(TRACKING_PIXEL_GIF.to_vec())
}

fn parse_id(raw: Option<&str>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_is_a_valid_gif89a() {
        assert_eq!(&TRACKING_PIXEL_GIF[..6], b"GIF89a");
        assert_eq!(TRACKING_PIXEL_GIF.len(), 43);
        assert_eq!(*TRACKING_PIXEL_GIF.last().unwrap(), 0x3B);
    }

    #[test]
    fn id_parsing_is_strict() {
        assert_eq!(parse_id(Some("42")), Some(42));
        assert_eq!(parse_id(Some(" 42 ")), Some(42));
        assert_eq!(parse_id(Some("42abc")), None);
        assert_eq!(parse_id(Some("-1")), None);
        assert_eq!(parse_id(Some("")), None);
        assert_eq!(parse_id(None), None);
    }
}
