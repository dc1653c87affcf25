// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::time::Duration;

use chrono::DateTime;
use serde::de::DeserializeOwned;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::{MailTrailError, MailTrailResult};
use crate::modules::graph::model::{Message, MessageListResponse, SendMailRequest};
use crate::modules::graph::token::fetch_graph_token;
use crate::modules::settings::cli::SETTINGS;
use crate::{mailtrail_version, raise_error};

const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Projection used by the reconciliation fetches. `internetMessageHeaders` is
/// what makes reply threading (`In-Reply-To`/`References`) visible.
const MESSAGE_SELECT: &str =
    "id,subject,body,bodyPreview,from,receivedDateTime,internetMessageId,internetMessageHeaders";

pub struct GraphClient {
    client: reqwest::Client,
    access_token: String,
}

impl GraphClient {
    /// Resolves credentials, exchanges them for a fresh bearer token and
    /// builds the HTTP client. One `GraphClient` serves one run or request.
    pub async fn connect() -> MailTrailResult<Self> {
        let credentials = SETTINGS.mail_credentials()?;
        let access_token = fetch_graph_token(&credentials).await?;
        let client = reqwest::ClientBuilder::new()
            .user_agent(mailtrail_version!())
            .timeout(Duration::from_secs(SETTINGS.mailtrail_http_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                raise_error!(
                    format!("Failed to build HTTP client: {:#?}", e),
                    ErrorCode::InternalError
                )
            })?;
        Ok(Self {
            client,
            access_token,
        })
    }

    pub async fn send_mail(
        &self,
        sender: &str,
        request: &SendMailRequest,
    ) -> MailTrailResult<()> {
        let url = format!("{GRAPH_BASE_URL}/users/{sender}/sendMail");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(raise_error!(
                format!("Graph sendMail returned {status}: {body}"),
                ErrorCode::MailSendFailed
            ));
        }
        Ok(())
    }

    /// Inbox messages received at or after `since_ms`, newest first, capped at
    /// the configured fetch limit.
    pub async fn list_inbox_since(
        &self,
        mailbox: &str,
        since_ms: i64,
    ) -> MailTrailResult<Vec<Message>> {
        let after = format_graph_timestamp(since_ms);
        let url = format!(
            "{GRAPH_BASE_URL}/users/{mailbox}/mailFolders/inbox/messages?\
            $filter=receivedDateTime ge {after}&\
            $orderby=receivedDateTime desc&\
            $select={MESSAGE_SELECT}&\
            $top={limit}",
            limit = SETTINGS.mailtrail_mailbox_fetch_limit,
        );
        let list: MessageListResponse = self.get_json(&url, ErrorCode::MailboxFetchFailed).await?;
        Ok(list.value)
    }

    /// Internet message id of the newest Sent Items entry carrying `subject`.
    ///
    /// Graph rejects `$orderby` on properties absent from `$filter`, so the
    /// candidates are ordered client-side instead.
    pub async fn find_sent_message_id(
        &self,
        sender: &str,
        subject: &str,
    ) -> MailTrailResult<Option<String>> {
        // OData escapes single quotes by doubling them.
        let escaped = subject.replace('\'', "''");
        let url = format!(
            "{GRAPH_BASE_URL}/users/{sender}/mailFolders/sentitems/messages?\
            $filter=subject eq '{subject}'&\
            $select=id,subject,internetMessageId,receivedDateTime&\
            $top=10",
            subject = urlencoding::encode(&escaped),
        );
        let list: MessageListResponse = self.get_json(&url, ErrorCode::MailboxFetchFailed).await?;
        let newest = list
            .value
            .into_iter()
            .max_by_key(|m| m.received_at_ms().unwrap_or(i64::MIN));
        Ok(newest.and_then(|m| m.internet_message_id))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        code: ErrorCode,
    ) -> MailTrailResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(raise_error!(
                format!("Graph request returned {status}: {body}"),
                code
            ));
        }
        let value = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), code))?;
        serde_json::from_value::<T>(value).map_err(|e| {
            raise_error!(
                format!(
                    "Failed to deserialize Graph API response: {:#?}. Possible model mismatch or API change.",
                    e
                ),
                ErrorCode::InternalError
            )
        })
    }
}

fn transport_error(e: reqwest::Error) -> MailTrailError {
    let code = if e.is_timeout() {
        ErrorCode::ConnectionTimeout
    } else {
        ErrorCode::NetworkError
    };
    raise_error!(format!("{:#?}", e), code)
}

fn format_graph_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_timestamp_format() {
        assert_eq!(format_graph_timestamp(1755691200000), "2025-08-20T12:00:00Z");
    }
}
