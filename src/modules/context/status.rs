use crate::modules::context::MAILTRAIL_CONTEXT;
use chrono::Local;
use poem_openapi::Object;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use timeago::Formatter;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct MailTrailStatus {
    /// The service uptime in milliseconds since it started.
    pub uptime_ms: i64,
    /// A human-readable string indicating the time elapsed since the service started (e.g., "2 hours ago").
    pub timeago: String,
    /// The timezone in which the service is operating (e.g., "UTC" or "Asia/Tokyo").
    pub timezone: String,
    /// The version of the MailTrail service currently running.
    pub version: String,
    /// Short commit hash the running binary was built from.
    pub git: String,
}

impl MailTrailStatus {
    pub fn get() -> Self {
        Self {
            uptime_ms: MAILTRAIL_CONTEXT.uptime_ms(),
            timeago: Formatter::new()
                .convert(Duration::from_millis(MAILTRAIL_CONTEXT.uptime_ms() as u64)),
            timezone: Local::now().offset().to_string(),
            version: env!("CARGO_PKG_VERSION").into(),
            git: env!("GIT_HASH").into(),
        }
    }
}
