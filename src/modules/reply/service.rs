// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashMap;
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    modules::{
        crm::notification::Notification,
        database::{manager::DB_MANAGER, update_impl},
        email::entity::{EmailStatus, OutboundEmail, OutboundEmailKey},
        error::{code::ErrorCode, MailTrailResult},
        graph::{client::GraphClient, model::Message},
        metrics::MAILTRAIL_REPLIES_DETECTED_TOTAL,
        reply::entity::EmailReply,
        settings::cli::SETTINGS,
    },
    raise_error, utc_now,
};

/// What one reconciliation run did, returned by the on-demand endpoint and
/// logged by the periodic task.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Object)]
pub struct ReplyRunSummary {
    /// Distinct sender mailboxes fetched.
    pub senders_polled: u64,
    /// Sender mailboxes whose fetch failed and was skipped.
    pub senders_failed: u64,
    /// Inbox messages examined across all senders.
    pub messages_scanned: u64,
    /// New EmailReply rows written this run.
    pub replies_recorded: u64,
}

/// Threads inbox messages back to tracked sends via `In-Reply-To` and
/// `References`. Only emails with a captured message id can be matched; the
/// unique dedup key on EmailReply makes re-running over the same inbox a
/// no-op.
pub struct ReplyReconciler {
    graph: GraphClient,
    summary: ReplyRunSummary,
}

impl ReplyReconciler {
    /// Constructing the graph client performs the token exchange, so a
    /// credential problem aborts the run before any mailbox is touched.
    pub async fn run() -> MailTrailResult<ReplyRunSummary> {
        let graph = GraphClient::connect().await?;
        let mut reconciler = ReplyReconciler {
            graph,
            summary: ReplyRunSummary::default(),
        };
        reconciler.scan().await?;
        info!(summary = ?reconciler.summary, "Reply reconciliation run finished");
        Ok(reconciler.summary)
    }

    async fn scan(&mut self) -> MailTrailResult<()> {
        let cutoff = utc_now!() - (SETTINGS.mailtrail_reply_window_days * 24 * 3600 * 1000) as i64;
        let recent = OutboundEmail::list_sent_since(cutoff).await?;

        // sender -> (stored message id -> email id); only rows whose
        // message-id capture succeeded can be threaded.
        let mut by_sender: AHashMap<String, AHashMap<String, u64>> = AHashMap::new();
        for email in recent {
            let Some(message_id) = email.message_id.clone() else {
                continue;
            };
            by_sender
                .entry(email.sender_email.to_lowercase())
                .or_default()
                .insert(message_id, email.id);
        }

        for (sender, sent_index) in by_sender {
            let messages = match self.graph.list_inbox_since(&sender, cutoff).await {
                Ok(messages) => {
                    self.summary.senders_polled += 1;
                    messages
                }
                Err(error) => {
                    // A 403 on one shared mailbox must not sink the batch.
                    warn!(sender, "Mailbox fetch failed, skipping sender: {error:?}");
                    self.summary.senders_polled += 1;
                    self.summary.senders_failed += 1;
                    continue;
                }
            };
            for message in &messages {
                self.summary.messages_scanned += 1;
                let Some(email_id) = match_reply(&sent_index, message) else {
                    continue;
                };
                // Graph occasionally omits internetMessageId on drafts and
                // calendar items; the resource id still dedups correctly.
                let provider_message_id = message
                    .internet_message_id
                    .clone()
                    .unwrap_or_else(|| message.id.clone());
                match EmailReply::exists_for(email_id, &provider_message_id).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(error) => {
                        warn!(email_id, "Reply dedup lookup failed: {error:?}");
                        continue;
                    }
                }
                match record_reply(email_id, message, provider_message_id).await {
                    Ok(()) => {
                        self.summary.replies_recorded += 1;
                        MAILTRAIL_REPLIES_DETECTED_TOTAL.inc();
                    }
                    Err(error) => {
                        // Concurrent runs race on the dedup key; the loser
                        // simply skips.
                        warn!(email_id, "Failed to record reply: {error:?}");
                    }
                }
            }
        }
        Ok(())
    }
}

/// The message id this inbox message replies to: `In-Reply-To` when present,
/// otherwise the last token of `References` (the direct parent per RFC 5322).
fn reply_target(message: &Message) -> Option<String> {
    if let Some(value) = message.header("In-Reply-To") {
        let stripped = strip_brackets(value);
        if !stripped.is_empty() {
            return Some(stripped.to_string());
        }
    }
    message
        .header("References")
        .and_then(|value| value.split_whitespace().last())
        .map(strip_brackets)
        .filter(|stripped| !stripped.is_empty())
        .map(str::to_string)
}

fn strip_brackets(value: &str) -> &str {
    value.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Looks the threading target up in the sent index, with and without angle
/// brackets; stored message ids usually keep theirs.
fn match_reply(sent_index: &AHashMap<String, u64>, message: &Message) -> Option<u64> {
    let target = reply_target(message)?;
    sent_index
        .get(&target)
        .or_else(|| sent_index.get(&format!("<{target}>")))
        .copied()
}

/// Writes the reply row, then advances the email's reply state in one store
/// transaction. The EmailReply insert is the idempotency gate: its unique
/// dedup key rejects a second write for the same provider message.
pub async fn record_reply(
    email_id: u64,
    message: &Message,
    provider_message_id: String,
) -> MailTrailResult<()> {
    let received_at = message.received_at_ms().unwrap_or_else(|| utc_now!());
    let reply = EmailReply::new(
        email_id,
        message.from_address().unwrap_or_default().to_string(),
        message
            .from
            .as_ref()
            .and_then(|r| r.email_address.name.clone()),
        message.subject.clone(),
        message.body_preview.clone(),
        received_at,
        provider_message_id,
    );
    let from_email = reply.from_email.clone();
    reply.save().await?;

    let previous = update_impl(
        DB_MANAGER.meta_db(),
        move |rw| {
            rw.get()
                .secondary::<OutboundEmail>(OutboundEmailKey::id, email_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("The email with id={email_id} that you want to modify was not found."),
                        ErrorCode::ResourceNotFound
                    )
                })
        },
        move |current| {
            let mut updated = current.clone();
            updated.reply_count += 1;
            updated.last_reply_at = Some(received_at);
            if current.reply_count == 0 {
                updated.replied_at = Some(received_at);
            }
            // Bounced is sticky; the counters still advance.
            if current.status != EmailStatus::Bounced {
                updated.status = EmailStatus::Replied;
            }
            Ok(updated)
        },
    )
    .await?;

    if previous.reply_count == 0 {
        Notification::notify(
            &previous.sent_by,
            "Email replied",
            &format!("{} replied to \"{}\"", from_email, previous.subject),
            Some(email_id),
        )
        .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::graph::model::{EmailAddress, InternetMessageHeader, Recipient};

    fn inbound(headers: Vec<(&str, &str)>) -> Message {
        Message {
            id: "AAMk-resource-id".into(),
            internet_message_id: Some("<reply-msg@acme.com>".into()),
            subject: Some("Re: Quarterly report".into()),
            body_preview: Some("Looks good, thanks!".into()),
            from: Some(Recipient {
                email_address: EmailAddress {
                    name: Some("Jane Doe".into()),
                    address: Some("jane@acme.com".into()),
                },
            }),
            received_date_time: Some("2025-08-20T12:00:00Z".into()),
            internet_message_headers: Some(
                headers
                    .into_iter()
                    .map(|(name, value)| InternetMessageHeader {
                        name: name.into(),
                        value: value.into(),
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn in_reply_to_wins_over_references() {
        let message = inbound(vec![
            ("In-Reply-To", "<direct@corp.io>"),
            ("References", "<root@corp.io> <middle@corp.io>"),
        ]);
        assert_eq!(reply_target(&message).as_deref(), Some("direct@corp.io"));
    }

    #[test]
    fn references_falls_back_to_last_token() {
        let message = inbound(vec![(
            "References",
            "<root@corp.io>\r\n <middle@corp.io> <parent@corp.io>",
        )]);
        assert_eq!(reply_target(&message).as_deref(), Some("parent@corp.io"));
    }

    #[test]
    fn unthreaded_message_has_no_target() {
        let message = inbound(vec![("X-Mailer", "Outlook")]);
        assert_eq!(reply_target(&message), None);
    }

    #[test]
    fn match_tries_both_bracket_forms() {
        let mut sent_index = AHashMap::new();
        sent_index.insert("<kept@corp.io>".to_string(), 11u64);
        sent_index.insert("bare@corp.io".to_string(), 12u64);

        let bracketed = inbound(vec![("In-Reply-To", "<kept@corp.io>")]);
        assert_eq!(match_reply(&sent_index, &bracketed), Some(11));

        let bare = inbound(vec![("In-Reply-To", "<bare@corp.io>")]);
        assert_eq!(match_reply(&sent_index, &bare), Some(12));

        let unknown = inbound(vec![("In-Reply-To", "<stranger@corp.io>")]);
        assert_eq!(match_reply(&sent_index, &unknown), None);
    }

    async fn tracked_email(recipient: &str, sent_by: &str) -> OutboundEmail {
        let mut email = OutboundEmail::new(
            recipient.into(),
            None,
            "reply-sender@corp.io".into(),
            "Quarterly report".into(),
            sent_by.into(),
        );
        email.message_id = Some("<sent-msg@corp.io>".into());
        email.save().await.unwrap();
        email
    }

    #[tokio::test]
    async fn first_reply_transitions_and_notifies() {
        let email = tracked_email("first-reply@acme.com", "reply-owner-a@corp.io").await;
        let message = inbound(vec![("In-Reply-To", "<sent-msg@corp.io>")]);

        record_reply(email.id, &message, "<reply-msg@acme.com>".into())
            .await
            .unwrap();

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Replied);
        assert_eq!(row.reply_count, 1);
        assert_eq!(row.replied_at, Some(1755691200000));
        assert_eq!(row.last_reply_at, Some(1755691200000));

        let replies = EmailReply::list_for_email(email.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].from_email, "jane@acme.com");
        assert_eq!(replies[0].body_preview.as_deref(), Some("Looks good, thanks!"));

        let notifications = Notification::list_for_user("reply-owner-a@corp.io")
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].body.contains("jane@acme.com"));
        assert!(notifications[0].body.contains("Quarterly report"));
    }

    #[tokio::test]
    async fn second_reply_advances_counters_without_renotifying() {
        let email = tracked_email("second-reply@acme.com", "reply-owner-b@corp.io").await;
        let message = inbound(vec![("In-Reply-To", "<sent-msg@corp.io>")]);

        record_reply(email.id, &message, "<reply-one@acme.com>".into())
            .await
            .unwrap();
        let first = OutboundEmail::get(email.id).await.unwrap().unwrap();

        record_reply(email.id, &message, "<reply-two@acme.com>".into())
            .await
            .unwrap();
        let second = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(second.reply_count, 2);
        assert_eq!(second.replied_at, first.replied_at);

        let notifications = Notification::list_for_user("reply-owner-b@corp.io")
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_provider_message_is_rejected() {
        let email = tracked_email("dup-reply@acme.com", "reply-owner-c@corp.io").await;
        let message = inbound(vec![("In-Reply-To", "<sent-msg@corp.io>")]);

        record_reply(email.id, &message, "<same-reply@acme.com>".into())
            .await
            .unwrap();
        assert!(
            record_reply(email.id, &message, "<same-reply@acme.com>".into())
                .await
                .is_err()
        );

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(row.reply_count, 1);
        assert!(EmailReply::exists_for(email.id, "<same-reply@acme.com>")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn bounced_status_survives_a_reply() {
        let email = tracked_email("bounced-reply@acme.com", "reply-owner-d@corp.io").await;
        crate::modules::bounce::service::apply_bounce(email.id, None, Some("mailbox full".into()))
            .await
            .unwrap();

        let message = inbound(vec![("In-Reply-To", "<sent-msg@corp.io>")]);
        record_reply(email.id, &message, "<late-reply@acme.com>".into())
            .await
            .unwrap();

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Bounced);
        assert_eq!(row.reply_count, 1);
        assert!(row.replied_at.is_some());
    }
}
