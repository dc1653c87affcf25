// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::{code::ErrorCode, MailTrailResult};
use crate::raise_error;
use clap::{builder::ValueParser, Parser};
use std::{collections::HashSet, path::PathBuf, sync::LazyLock};
use url::Url;

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new_for_test);

#[derive(Debug, Parser)]
#[clap(
    name = "mailtrail",
    about = "A delivery lifecycle tracker for transactional CRM email:
    sends through the Microsoft Graph API, embeds open-tracking pixels, and reconciles bounces and replies by polling the sender mailbox.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    #[clap(
        long,
        default_value = "info",
        env,
        help = "Log level: error, warn, info, debug or trace"
    )]
    pub mailtrail_log_level: String,

    #[clap(
        long,
        default_value = "15810",
        env,
        help = "Port the HTTP server listens on"
    )]
    pub mailtrail_http_port: i32,

    #[clap(
        long,
        env,
        default_value = "0.0.0.0",
        help = "IPv4 address the HTTP server binds to",
        value_parser = ValueParser::new(|s: &str| {
            s.parse::<std::net::Ipv4Addr>()
                .map(|_| s.to_string())
                .map_err(|_| format!("'{s}' is not an IPv4 address"))
        })
    )]
    pub mailtrail_bind_ip: Option<String>,

    /// Tracking pixel links are built on this base, so it must be reachable
    /// from the recipient's mail client for opens to register.
    #[clap(
        long,
        default_value = "http://localhost:15810",
        env,
        help = "Public base URL that tracking pixel links are built from",
        value_parser = ValueParser::new(|s: &str| -> Result<String, String> {
            Url::parse(s).map_err(|_| format!("'{s}' is not a valid URL"))?;
            Ok(s.trim_end_matches('/').to_string())
        })
    )]
    pub mailtrail_public_url: String,

    #[clap(
        long,
        default_value = "*",
        env,
        help = "Comma-separated list of allowed CORS origins; '*' allows any",
        value_parser = ValueParser::new(|s: &str| -> Result<HashSet<String>, String> {
            let set: HashSet<String> = s.split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
            Ok(set)
        })
    )]
    pub mailtrail_cors_origins: HashSet<String>,

    #[clap(
        long,
        default_value = "86400",
        env,
        help = "Seconds browsers may cache CORS preflight responses"
    )]
    pub mailtrail_cors_max_age: i32,

    #[clap(long, default_value = "true", env, help = "Color the stdout log output")]
    pub mailtrail_ansi_logs: bool,

    #[clap(
        long,
        default_value = "false",
        env,
        help = "Write logs to daily-rolled JSON files instead of stdout"
    )]
    pub mailtrail_log_to_file: bool,

    #[clap(
        long,
        default_value = "5",
        env,
        help = "How many rolled log files to keep"
    )]
    pub mailtrail_max_server_log_files: usize,

    #[clap(
        long,
        env,
        help = "Absolute directory where mailtrail keeps its database and logs",
        value_parser = ValueParser::new(|s: &str| {
            let path = PathBuf::from(s);
            if !path.is_absolute() {
                return Err(format!("'{s}' must be an absolute path"));
            }
            if !path.is_dir() {
                return Err(format!("'{s}' is not an existing directory"));
            }
            Ok(s.to_string())
        })
    )]
    pub mailtrail_root_dir: String,

    #[clap(
        long,
        env,
        default_value = "134217728",
        help = "Cache size in bytes for the metadata database"
    )]
    pub mailtrail_metadata_cache_size: Option<usize>,

    #[clap(
        long,
        env,
        default_value = "false",
        help = "Keep metadata in memory instead of on disk (data is lost on restart; intended for evaluation only)"
    )]
    pub mailtrail_metadata_memory_mode_enabled: bool,

    #[clap(
        long,
        default_value = "true",
        env,
        help = "Compress HTTP responses"
    )]
    pub mailtrail_http_compression_enabled: bool,

    /// Azure AD tenant id shared by all Graph API calls (generic fallback).
    #[clap(long, env, help = "Set the Azure AD tenant id for Graph API access")]
    pub mailtrail_tenant_id: Option<String>,

    /// Azure AD application (client) id (generic fallback).
    #[clap(long, env, help = "Set the Azure AD client id for Graph API access")]
    pub mailtrail_client_id: Option<String>,

    /// Azure AD client secret (generic fallback).
    #[clap(long, env, help = "Set the Azure AD client secret for Graph API access")]
    pub mailtrail_client_secret: Option<String>,

    /// Mail-specific Azure AD tenant id. Takes precedence over the generic one,
    /// so mail traffic can run under a dedicated app registration.
    #[clap(
        long,
        env,
        help = "Set a mail-specific Azure AD tenant id (overrides the generic tenant id)"
    )]
    pub mailtrail_email_tenant_id: Option<String>,

    /// Mail-specific Azure AD client id. Takes precedence over the generic one.
    #[clap(
        long,
        env,
        help = "Set a mail-specific Azure AD client id (overrides the generic client id)"
    )]
    pub mailtrail_email_client_id: Option<String>,

    /// Mail-specific Azure AD client secret. Takes precedence over the generic one.
    #[clap(
        long,
        env,
        help = "Set a mail-specific Azure AD client secret (overrides the generic client secret)"
    )]
    pub mailtrail_email_client_secret: Option<String>,

    #[clap(
        long,
        default_value = "45",
        env,
        help = "Delay in seconds before a freshly sent email becomes due for its bounce check",
        value_parser = clap::value_parser!(u64).range(5..)
    )]
    pub mailtrail_bounce_check_delay_secs: u64,

    #[clap(
        long,
        default_value = "72",
        env,
        help = "How many hours of inbox history to inspect when looking for non-delivery reports (1 to 168)",
        value_parser = clap::value_parser!(u64).range(1..=168)
    )]
    pub mailtrail_bounce_lookback_hours: u64,

    #[clap(
        long,
        default_value = "50",
        env,
        help = "Maximum number of pending bounce checks drained per reconciliation round",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub mailtrail_pending_check_batch_size: u64,

    #[clap(
        long,
        default_value = "7",
        env,
        help = "Days to retain completed or stale bounce check records before purging"
    )]
    pub mailtrail_check_retention_days: u64,

    #[clap(
        long,
        default_value = "5",
        env,
        help = "Opens arriving sooner than this many seconds after the send are treated as scanner prefetches"
    )]
    pub mailtrail_open_min_delay_secs: u64,

    #[clap(
        long,
        default_value = "300",
        env,
        help = "Window in seconds during which repeat opens from the same IP do not count as unique"
    )]
    pub mailtrail_open_dedup_window_secs: u64,

    #[clap(
        long,
        default_value = "7",
        env,
        help = "How many days back sent emails remain candidates for reply matching"
    )]
    pub mailtrail_reply_window_days: u64,

    #[clap(
        long,
        default_value = "300",
        env,
        help = "Interval in seconds between bounce reconciliation rounds (minimum: 60)",
        value_parser = clap::value_parser!(u64).range(60..)
    )]
    pub mailtrail_bounce_scan_interval_secs: u64,

    #[clap(
        long,
        default_value = "300",
        env,
        help = "Interval in seconds between reply reconciliation rounds (minimum: 60)",
        value_parser = clap::value_parser!(u64).range(60..)
    )]
    pub mailtrail_reply_scan_interval_secs: u64,

    #[clap(
        long,
        default_value = "3",
        env,
        help = "Seconds to wait after a send before reading the provider message id from the sent folder"
    )]
    pub mailtrail_message_id_settle_secs: u64,

    #[clap(
        long,
        default_value = "50",
        env,
        help = "Page size used when listing mailbox messages from the Graph API",
        value_parser = clap::value_parser!(u32).range(1..=200)
    )]
    pub mailtrail_mailbox_fetch_limit: u32,

    #[clap(
        long,
        default_value = "30",
        env,
        help = "Total timeout in seconds for outbound Graph API requests",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub mailtrail_http_timeout_secs: u64,
}

/// Resolved Graph API credentials after the mail-specific/generic fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Settings {
    /// Resolves Graph credentials for mail traffic. Each field prefers the
    /// mail-specific variable and falls back to the generic one.
    pub fn mail_credentials(&self) -> MailTrailResult<MailCredentials> {
        let tenant_id = pick_credential(
            &self.mailtrail_email_tenant_id,
            &self.mailtrail_tenant_id,
        )
        .ok_or_else(|| {
            raise_error!(
                "Graph API tenant id is not configured: set MAILTRAIL_EMAIL_TENANT_ID or MAILTRAIL_TENANT_ID."
                    .into(),
                ErrorCode::MissingConfiguration
            )
        })?;
        let client_id = pick_credential(
            &self.mailtrail_email_client_id,
            &self.mailtrail_client_id,
        )
        .ok_or_else(|| {
            raise_error!(
                "Graph API client id is not configured: set MAILTRAIL_EMAIL_CLIENT_ID or MAILTRAIL_CLIENT_ID."
                    .into(),
                ErrorCode::MissingConfiguration
            )
        })?;
        let client_secret = pick_credential(
            &self.mailtrail_email_client_secret,
            &self.mailtrail_client_secret,
        )
        .ok_or_else(|| {
            raise_error!(
                "Graph API client secret is not configured: set MAILTRAIL_EMAIL_CLIENT_SECRET or MAILTRAIL_CLIENT_SECRET."
                    .into(),
                ErrorCode::MissingConfiguration
            )
        })?;
        Ok(MailCredentials {
            tenant_id,
            client_id,
            client_secret,
        })
    }

    /// Builds the pixel URL embedded in outgoing mail for the given email id.
    pub fn tracking_url(&self, email_id: u64) -> String {
        format!(
            "{}/track-email-open?id={}",
            self.mailtrail_public_url, email_id
        )
    }

    #[cfg(test)]
    fn new_for_test() -> Self {
        Self {
            mailtrail_log_level: "info".to_string(),
            mailtrail_http_port: 15810,
            mailtrail_bind_ip: Default::default(),
            mailtrail_public_url: "http://localhost:15810".to_string(),
            mailtrail_cors_origins: Default::default(),
            mailtrail_cors_max_age: 86400,
            mailtrail_ansi_logs: false,
            mailtrail_log_to_file: false,
            mailtrail_max_server_log_files: 5,
            mailtrail_root_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            mailtrail_metadata_cache_size: None,
            mailtrail_metadata_memory_mode_enabled: true,
            mailtrail_http_compression_enabled: true,
            mailtrail_tenant_id: None,
            mailtrail_client_id: None,
            mailtrail_client_secret: None,
            mailtrail_email_tenant_id: None,
            mailtrail_email_client_id: None,
            mailtrail_email_client_secret: None,
            mailtrail_bounce_check_delay_secs: 45,
            mailtrail_bounce_lookback_hours: 72,
            mailtrail_pending_check_batch_size: 50,
            mailtrail_check_retention_days: 7,
            mailtrail_open_min_delay_secs: 5,
            mailtrail_open_dedup_window_secs: 300,
            mailtrail_reply_window_days: 7,
            mailtrail_bounce_scan_interval_secs: 300,
            mailtrail_reply_scan_interval_secs: 300,
            mailtrail_message_id_settle_secs: 3,
            mailtrail_mailbox_fetch_limit: 50,
            mailtrail_http_timeout_secs: 30,
        }
    }
}

fn pick_credential(specific: &Option<String>, generic: &Option<String>) -> Option<String> {
    specific
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| generic.as_deref().filter(|s| !s.trim().is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mail_credentials_prefer_mail_specific() {
        let mut settings = Settings::new_for_test();
        settings.mailtrail_tenant_id = Some("generic-tenant".into());
        settings.mailtrail_client_id = Some("generic-client".into());
        settings.mailtrail_client_secret = Some("generic-secret".into());
        settings.mailtrail_email_tenant_id = Some("mail-tenant".into());

        let credentials = settings.mail_credentials().unwrap();
        assert_eq!(credentials.tenant_id, "mail-tenant");
        assert_eq!(credentials.client_id, "generic-client");
        assert_eq!(credentials.client_secret, "generic-secret");
    }

    #[test]
    fn test_mail_credentials_ignore_blank_values() {
        let mut settings = Settings::new_for_test();
        settings.mailtrail_tenant_id = Some("generic-tenant".into());
        settings.mailtrail_client_id = Some("generic-client".into());
        settings.mailtrail_client_secret = Some("generic-secret".into());
        settings.mailtrail_email_tenant_id = Some("   ".into());

        let credentials = settings.mail_credentials().unwrap();
        assert_eq!(credentials.tenant_id, "generic-tenant");
    }

    #[test]
    fn test_mail_credentials_missing_secret() {
        let mut settings = Settings::new_for_test();
        settings.mailtrail_tenant_id = Some("generic-tenant".into());
        settings.mailtrail_client_id = Some("generic-client".into());

        let result = settings.mail_credentials();
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("client secret"));
    }

    #[test]
    fn test_tracking_url() {
        let settings = Settings::new_for_test();
        assert_eq!(
            settings.tracking_url(42),
            "http://localhost:15810/track-email-open?id=42"
        );
    }
}
