// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::email::entity::OutboundEmail;
use crate::modules::email::send::{send_tracked_email, SendEmailRequest};
use crate::modules::rest::api::ApiTags;
use crate::modules::rest::ApiResult;

use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

pub struct SendMailApi;

#[OpenApi(prefix_path = "/api/v1", tag = "ApiTags::SendMail")]
impl SendMailApi {
    /// Sends a tracked email through the configured Graph mailbox.
    ///
    /// The created record is returned immediately; open, bounce and reply
    /// state accrue on it as the tracking pixel and the reconciliation
    /// services observe activity. A rejected send fails the request but the
    /// record is kept as an audit trail of the attempt.
    #[oai(path = "/send-email", method = "post", operation_id = "send_email")]
    async fn send_email(
        &self,
        /// A JSON payload describing the recipient, content, attachments and CRM links
        request: Json<SendEmailRequest>,
    ) -> ApiResult<Json<OutboundEmail>> {
        Ok(Json(send_tracked_email(request.0).await?))
    }
}
