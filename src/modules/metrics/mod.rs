use std::sync::LazyLock;

use crate::mailtrail_version;
use crate::{
    modules::{context::Initialize, error::MailTrailResult},
    utc_now,
};
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Gauge, GaugeVec, HistogramVec, IntCounter, IntCounterVec,
};

pub mod endpoint;

pub const SUCCESS: &str = "success";
pub const FAILURE: &str = "failure";

pub const METRIC_REQUEST_DURATION_BY_STATUS: &str = "mailtrail_request_duration_seconds_by_status";
pub const METRIC_REQUEST_DURATION_BY_METHOD_AND_OPERATION: &str =
    "mailtrail_request_duration_seconds_by_method_and_operation";
pub const METRIC_REQUEST_TOTAL_BY_METHOD_AND_OPERATION: &str =
    "mailtrail_request_total_by_method_and_operation";
pub const METRIC_EMAIL_SENT_TOTAL: &str = "mailtrail_email_sent_total";
pub const METRIC_EMAIL_SEND_DURATION_SECONDS: &str = "mailtrail_email_send_duration_seconds";
pub const METRIC_PIXEL_REQUESTS_TOTAL: &str = "mailtrail_pixel_requests_total";
pub const METRIC_EMAIL_OPENS_TOTAL: &str = "mailtrail_email_opens_total";
pub const METRIC_BOUNCES_DETECTED_TOTAL: &str = "mailtrail_bounces_detected_total";
pub const METRIC_REPLIES_DETECTED_TOTAL: &str = "mailtrail_replies_detected_total";
pub const METRIC_NOTIFICATIONS_TOTAL: &str = "mailtrail_notifications_total";
pub const METRIC_BUILD_INFO: &str = "mailtrail_build_info";
pub const METRIC_START_TIMESTAMP: &str = "mailtrail_start_timestamp";

pub static MAILTRAIL_BUILD_INFO: LazyLock<GaugeVec> = LazyLock::new(|| {
    register_gauge_vec!(
        METRIC_BUILD_INFO,
        "Constant 1, labeled with the running version and commit hash",
        &["version", "commit"]
    )
    .expect("metric registration failed: mailtrail_build_info")
});

pub static MAILTRAIL_START_TIMESTAMP: LazyLock<Gauge> = LazyLock::new(|| {
    register_gauge!(
        METRIC_START_TIMESTAMP,
        "Process start time as a unix timestamp in milliseconds"
    )
    .expect("metric registration failed: mailtrail_start_timestamp")
});

pub static MAILTRAIL_REQUEST_DURATION_BY_STATUS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        METRIC_REQUEST_DURATION_BY_STATUS,
        "HTTP request latency in seconds, labeled by response status",
        &["status"]
    )
    .expect("metric registration failed: request_duration_seconds_by_status")
});

pub static MAILTRAIL_REQUEST_DURATION_BY_METHOD_AND_OPERATION: LazyLock<HistogramVec> =
    LazyLock::new(|| {
        register_histogram_vec!(
            METRIC_REQUEST_DURATION_BY_METHOD_AND_OPERATION,
            "HTTP request latency in seconds, labeled by method, operation and status",
            &["method", "operation_id", "status"]
        )
        .expect("metric registration failed: request_duration_seconds_by_method_and_operation")
    });

pub static MAILTRAIL_REQUEST_TOTAL_BY_METHOD_AND_OPERATION: LazyLock<IntCounterVec> =
    LazyLock::new(|| {
        register_int_counter_vec!(
            METRIC_REQUEST_TOTAL_BY_METHOD_AND_OPERATION,
            "HTTP requests served, labeled by method, operation and status",
            &["method", "operation_id", "status"]
        )
        .expect("metric registration failed: request_total_by_method_and_operation")
    });

pub static MAILTRAIL_EMAIL_SENT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        METRIC_EMAIL_SENT_TOTAL,
        "Send attempts through the Graph API, labeled success or failure",
        &["status"]
    )
    .expect("metric registration failed: mailtrail_email_sent_total")
});

pub static MAILTRAIL_EMAIL_SEND_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        METRIC_EMAIL_SEND_DURATION_SECONDS,
        "Graph sendMail latency in seconds, labeled success or failure",
        &["status"],
        vec![0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0, 30.0, 60.0]
    )
    .expect("metric registration failed: email_send_duration_seconds")
});

pub static MAILTRAIL_PIXEL_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        METRIC_PIXEL_REQUESTS_TOTAL,
        "Tracking pixel hits, labeled by the outcome recorded for them",
        &["outcome"]
    )
    .expect("metric registration failed: mailtrail_pixel_requests_total")
});

pub static MAILTRAIL_EMAIL_OPENS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        METRIC_EMAIL_OPENS_TOTAL,
        "Opens that survived bot, prematurity and duplicate filtering"
    )
    .expect("metric registration failed: email_opens_total")
});

pub static MAILTRAIL_BOUNCES_DETECTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        METRIC_BOUNCES_DETECTED_TOTAL,
        "Bounces confirmed against non-delivery reports, labeled by reconciliation pass",
        &["pass"]
    )
    .expect("metric registration failed: mailtrail_bounces_detected_total")
});

pub static MAILTRAIL_REPLIES_DETECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        METRIC_REPLIES_DETECTED_TOTAL,
        "Replies threaded back to a tracked send"
    )
    .expect("metric registration failed: mailtrail_replies_detected_total")
});

pub static MAILTRAIL_NOTIFICATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        METRIC_NOTIFICATIONS_TOTAL,
        "Owner notifications recorded, labeled by delivery status",
        &["status"]
    )
    .expect("metric registration failed: mailtrail_notifications_total")
});

pub struct MetricsService;

impl Initialize for MetricsService {
    async fn initialize() -> MailTrailResult<()> {
        MAILTRAIL_START_TIMESTAMP.set(utc_now!() as f64);
        MAILTRAIL_BUILD_INFO
            .with_label_values(&[mailtrail_version!(), env!("GIT_HASH")])
            .set(1.0);
        Ok(())
    }
}
