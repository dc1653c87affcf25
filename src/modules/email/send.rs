// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    modules::{
        bounce::entity::PendingBounceCheck,
        email::{entity::OutboundEmail, transform::render_email_html},
        error::{code::ErrorCode, MailTrailResult},
        graph::{
            client::GraphClient,
            model::{
                EmailAddress, FileAttachment, MessageBody, OutgoingMessage, Recipient,
                SendMailRequest,
            },
        },
        metrics::{
            MAILTRAIL_EMAIL_SEND_DURATION_SECONDS, MAILTRAIL_EMAIL_SENT_TOTAL, FAILURE, SUCCESS,
        },
        settings::cli::SETTINGS,
    },
    raise_error, validate_email,
};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Object)]
pub struct AttachmentRequest {
    /// File name shown to the recipient.
    #[oai(validator(min_length = 1, max_length = 255))]
    pub name: String,
    /// MIME type; guessed from the file name when absent.
    pub content_type: Option<String>,
    /// Base64-encoded payload.
    pub content: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Object)]
pub struct SendEmailRequest {
    #[oai(validator(custom = "crate::modules::common::validator::EmailValidator"))]
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    #[oai(validator(min_length = 1, max_length = 500))]
    pub subject: String,
    /// Rich-text editor HTML; rewritten for mail clients before sending.
    pub body: String,
    pub attachments: Option<Vec<AttachmentRequest>>,
    /// Mailbox the email goes out from; also the mailbox polled for NDRs
    /// and replies.
    #[oai(validator(custom = "crate::modules::common::validator::EmailValidator"))]
    pub sender_email: String,
    /// Owning CRM user; lifecycle notifications go to them.
    #[oai(validator(min_length = 1, max_length = 255))]
    pub sent_by: String,
    pub contact_id: Option<u64>,
    pub lead_id: Option<u64>,
    pub account_id: Option<u64>,
}

/// Sends one tracked email: creates the audit row, rewrites the body with the
/// tracking pixel, pushes it through the graph API, then schedules the
/// message-id capture and the deferred bounce check.
///
/// The row is inserted first because the pixel URL embeds its id; a rejected
/// send keeps the row behind as a failure record.
pub async fn send_tracked_email(request: SendEmailRequest) -> MailTrailResult<OutboundEmail> {
    validate_email!(&request.recipient_email)?;
    validate_email!(&request.sender_email)?;

    let started = Instant::now();
    let mut email = OutboundEmail::new(
        request.recipient_email.clone(),
        request.recipient_name.clone(),
        request.sender_email.clone(),
        request.subject.clone(),
        request.sent_by.clone(),
    );
    email.contact_id = request.contact_id;
    email.lead_id = request.lead_id;
    email.account_id = request.account_id;
    email.save().await?;

    let pixel_url = SETTINGS.tracking_url(email.id);
    let body_html = render_email_html(&request.body, &pixel_url);
    OutboundEmail::attach_rendered_body(email.id, body_html.clone()).await?;

    let graph = match GraphClient::connect().await {
        Ok(graph) => graph,
        Err(error) => {
            observe_send(started, FAILURE);
            return Err(error);
        }
    };

    let send_request = SendMailRequest {
        message: OutgoingMessage {
            subject: request.subject.clone(),
            body: MessageBody {
                content_type: "HTML".into(),
                content: body_html,
            },
            to_recipients: vec![Recipient {
                email_address: EmailAddress {
                    name: request.recipient_name.clone(),
                    address: Some(request.recipient_email.clone()),
                },
            }],
            attachments: build_attachments(request.attachments)?,
        },
        save_to_sent_items: true,
    };

    if let Err(error) = graph.send_mail(&request.sender_email, &send_request).await {
        observe_send(started, FAILURE);
        return Err(error);
    }
    observe_send(started, SUCCESS);

    spawn_message_id_capture(
        graph,
        email.id,
        request.sender_email.clone(),
        request.subject.clone(),
    );

    // The periodic sweep covers a lost check, so a failed enqueue must not
    // fail a send that already went out.
    if let Err(error) = PendingBounceCheck::new(
        email.id,
        &request.sender_email,
        &request.recipient_email,
    )
    .enqueue()
    .await
    {
        warn!(email_id = email.id, "Failed to enqueue bounce check: {error:?}");
    }

    Ok(OutboundEmail::get(email.id).await?.ok_or_else(|| {
        raise_error!(
            format!("The email with id={} vanished after sending.", email.id),
            ErrorCode::InternalError
        )
    })?)
}

/// Graph `sendMail` rejects request bodies past 4 MB; larger attachments
/// would need an upload session, which this path does not do.
const MAX_ATTACHMENT_SIZE: usize = 3 * 1024 * 1024;

/// Validates and converts request attachments into graph file attachments.
fn build_attachments(
    attachments: Option<Vec<AttachmentRequest>>,
) -> MailTrailResult<Option<Vec<FileAttachment>>> {
    let Some(attachments) = attachments else {
        return Ok(None);
    };
    if attachments.is_empty() {
        return Ok(None);
    }
    let mut converted = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let decoded = general_purpose::STANDARD
            .decode(attachment.content.as_bytes())
            .map_err(|e| {
                raise_error!(
                    format!(
                        "Attachment '{}' is not valid base64: {}",
                        attachment.name, e
                    ),
                    ErrorCode::InvalidParameter
                )
            })?;
        if decoded.len() >= MAX_ATTACHMENT_SIZE {
            return Err(raise_error!(
                format!(
                    "Attachment '{}' is {} bytes, exceeding the maximum allowed size of {} bytes",
                    attachment.name,
                    decoded.len(),
                    MAX_ATTACHMENT_SIZE
                ),
                ErrorCode::ExceedsLimitation
            ));
        }
        let content_type = attachment.content_type.or_else(|| {
            mime_guess::from_path(&attachment.name)
                .first_raw()
                .map(|m| m.to_string())
        });
        converted.push(FileAttachment::new(
            attachment.name,
            content_type,
            attachment.content,
        ));
    }
    Ok(Some(converted))
}

/// The provider assigns the internet message id asynchronously, so the lookup
/// waits a short settle delay and searches Sent Items for the newest entry
/// with the same subject. Entirely best-effort: replies to this email are
/// simply not matched when the capture loses the race.
fn spawn_message_id_capture(graph: GraphClient, email_id: u64, sender: String, subject: String) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(SETTINGS.mailtrail_message_id_settle_secs)).await;
        match graph.find_sent_message_id(&sender, &subject).await {
            Ok(Some(message_id)) => {
                if let Err(error) = OutboundEmail::set_message_id(email_id, message_id).await {
                    warn!(email_id, "Failed to record captured message id: {error:?}");
                }
            }
            Ok(None) => {
                warn!(email_id, "No sent-items entry matched the subject, message id not captured");
            }
            Err(error) => {
                warn!(email_id, "Sent-items lookup failed, message id not captured: {error:?}");
            }
        }
    });
}

fn observe_send(started: Instant, status: &str) {
    MAILTRAIL_EMAIL_SENT_TOTAL.with_label_values(&[status]).inc();
    MAILTRAIL_EMAIL_SEND_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_require_valid_base64() {
        let result = build_attachments(Some(vec![AttachmentRequest {
            name: "report.pdf".into(),
            content_type: None,
            content: "not base64!!!".into(),
        }]));
        assert!(result.is_err());
    }

    #[test]
    fn attachment_content_type_guessed_from_name() {
        let converted = build_attachments(Some(vec![AttachmentRequest {
            name: "report.pdf".into(),
            content_type: None,
            content: general_purpose::STANDARD.encode(b"fake"),
        }]))
        .unwrap()
        .unwrap();
        assert_eq!(converted[0].content_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn explicit_attachment_content_type_wins() {
        let converted = build_attachments(Some(vec![AttachmentRequest {
            name: "data.bin".into(),
            content_type: Some("application/x-custom".into()),
            content: general_purpose::STANDARD.encode(b"fake"),
        }]))
        .unwrap()
        .unwrap();
        assert_eq!(
            converted[0].content_type.as_deref(),
            Some("application/x-custom")
        );
    }

    #[test]
    fn empty_attachment_list_collapses_to_none() {
        assert_eq!(build_attachments(Some(Vec::new())).unwrap(), None);
        assert_eq!(build_attachments(None).unwrap(), None);
    }

    #[test]
    fn oversized_attachment_is_rejected() {
        let result = build_attachments(Some(vec![AttachmentRequest {
            name: "dump.bin".into(),
            content_type: None,
            content: general_purpose::STANDARD.encode(vec![0u8; MAX_ATTACHMENT_SIZE]),
        }]));
        assert!(result.is_err());
    }
}
