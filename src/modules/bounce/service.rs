// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::{AHashMap, AHashSet};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    modules::{
        bounce::{
            entity::{CheckResult, PendingBounceCheck},
            ndr::{classify_bounce, parse_ndr, NdrReport, MAX_REASON_CHARS},
            subject::is_ndr_shaped,
        },
        crm::{contact::Contact, notification::Notification},
        database::{manager::DB_MANAGER, update_impl},
        email::entity::{BounceType, EmailStatus, OutboundEmail, OutboundEmailKey},
        error::{code::ErrorCode, MailTrailResult},
        graph::{client::GraphClient, model::Message},
        metrics::MAILTRAIL_BOUNCES_DETECTED_TOTAL,
        settings::cli::SETTINGS,
        utils::truncate_chars,
    },
    raise_error, utc_now,
};

/// What one reconciliation run did, returned by the on-demand endpoint and
/// logged by the periodic task.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Object)]
pub struct BounceRunSummary {
    /// Due checks consumed this run.
    pub pending_processed: u64,
    /// Due checks that matched an NDR and bounced their email.
    pub pending_matched: u64,
    /// Recent sends examined by the general sweep.
    pub swept_scanned: u64,
    /// Sweep examinations that bounced their email.
    pub swept_matched: u64,
    /// Distinct sender mailboxes fetched.
    pub senders_polled: u64,
    /// Sender mailboxes whose fetch failed and was skipped.
    pub senders_failed: u64,
    /// PendingBounceCheck rows removed by retention cleanup.
    pub expired_checks_removed: u64,
}

/// One engine, two passes: the pending-queue pass consumes due
/// PendingBounceChecks; the general sweep re-examines recent sends whose
/// sender the pending pass did not cover, catching NDRs that arrived after a
/// check already closed as Ok. Each sender's mailbox is fetched at most once
/// per run through a shared candidate cache.
pub struct BounceReconciler {
    graph: GraphClient,
    /// Lowercased sender -> parsed NDR reports from their inbox.
    candidates: AHashMap<String, Vec<NdrReport>>,
    /// Lowercased senders whose fetch failed this run.
    failed_senders: AHashSet<String>,
    summary: BounceRunSummary,
}

impl BounceReconciler {
    /// Runs both passes plus retention cleanup. Constructing the graph client
    /// performs the token exchange, so a credential problem aborts the run
    /// before any mailbox is touched.
    pub async fn run() -> MailTrailResult<BounceRunSummary> {
        let graph = GraphClient::connect().await?;
        let mut reconciler = BounceReconciler {
            graph,
            candidates: AHashMap::new(),
            failed_senders: AHashSet::new(),
            summary: BounceRunSummary::default(),
        };
        let pending_senders = reconciler.pending_pass().await?;
        reconciler.general_sweep(&pending_senders).await?;
        reconciler.collect_expired_checks().await;
        info!(summary = ?reconciler.summary, "Bounce reconciliation run finished");
        Ok(reconciler.summary)
    }

    /// Consumes due checks; returns the set of senders it covered so the
    /// sweep can skip them.
    async fn pending_pass(&mut self) -> MailTrailResult<AHashSet<String>> {
        let due =
            PendingBounceCheck::due(SETTINGS.mailtrail_pending_check_batch_size as usize).await?;

        // Close checks that need no mail fetch, group the rest by sender.
        let mut by_sender: AHashMap<String, Vec<PendingBounceCheck>> = AHashMap::new();
        for check in due {
            self.summary.pending_processed += 1;
            let email = OutboundEmail::get(check.email_id).await?;
            match email {
                None => {
                    // The email vanished; nothing left to watch.
                    self.close_check(check.id, CheckResult::Ok).await;
                }
                Some(email)
                    if email.status == EmailStatus::Bounced || email.bounce_type.is_some() =>
                {
                    self.close_check(check.id, CheckResult::Bounced).await;
                }
                Some(_) => {
                    by_sender
                        .entry(check.sender_email.to_lowercase())
                        .or_default()
                        .push(check);
                }
            }
        }

        let covered: AHashSet<String> = by_sender.keys().cloned().collect();
        for (sender, checks) in by_sender {
            let Some(reports) = self.candidate_reports(&sender).await else {
                // Fetch failed; leave these checks unconsumed for the next run.
                continue;
            };
            for check in checks {
                let recipient = check.recipient_email.to_lowercase();
                let matched = reports
                    .iter()
                    .find(|report| report.recipient.as_deref() == Some(recipient.as_str()))
                    .cloned();
                match matched {
                    Some(report) => {
                        match apply_bounce(check.email_id, None, report.reason.clone()).await {
                            Ok(_) => {
                                self.summary.pending_matched += 1;
                                MAILTRAIL_BOUNCES_DETECTED_TOTAL
                                    .with_label_values(&["pending"])
                                    .inc();
                                self.close_check(check.id, CheckResult::Bounced).await;
                            }
                            Err(error) => {
                                // Retry on the next run; the check stays open.
                                warn!(
                                    email_id = check.email_id,
                                    "Failed to apply bounce from pending check: {error:?}"
                                );
                            }
                        }
                    }
                    None => self.close_check(check.id, CheckResult::Ok).await,
                }
            }
        }
        Ok(covered)
    }

    /// Re-examines recent non-bounced sends from senders the pending pass did
    /// not cover.
    async fn general_sweep(&mut self, pending_senders: &AHashSet<String>) -> MailTrailResult<()> {
        let cutoff = utc_now!() - (SETTINGS.mailtrail_bounce_lookback_hours * 3600 * 1000) as i64;
        let recent = OutboundEmail::list_sent_since(cutoff).await?;

        let mut by_sender: AHashMap<String, Vec<OutboundEmail>> = AHashMap::new();
        for email in recent {
            if email.status == EmailStatus::Bounced || email.bounce_type.is_some() {
                continue;
            }
            let sender = email.sender_email.to_lowercase();
            if pending_senders.contains(&sender) {
                continue;
            }
            by_sender.entry(sender).or_default().push(email);
        }

        for (sender, emails) in by_sender {
            let Some(reports) = self.candidate_reports(&sender).await else {
                continue;
            };
            for email in emails {
                self.summary.swept_scanned += 1;
                let recipient = email.recipient_email.to_lowercase();
                let matched = reports
                    .iter()
                    .find(|report| report.recipient.as_deref() == Some(recipient.as_str()))
                    .cloned();
                if let Some(report) = matched {
                    match apply_bounce(email.id, None, report.reason.clone()).await {
                        Ok(true) => {
                            self.summary.swept_matched += 1;
                            MAILTRAIL_BOUNCES_DETECTED_TOTAL
                                .with_label_values(&["sweep"])
                                .inc();
                        }
                        Ok(false) => {}
                        Err(error) => {
                            warn!(
                                email_id = email.id,
                                "Failed to apply bounce from sweep: {error:?}"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetches and parses a sender's inbox once per run. `None` means the
    /// fetch failed and the sender is skipped for the rest of the run.
    async fn candidate_reports(&mut self, sender: &str) -> Option<Vec<NdrReport>> {
        if self.failed_senders.contains(sender) {
            return None;
        }
        if !self.candidates.contains_key(sender) {
            self.summary.senders_polled += 1;
            let since =
                utc_now!() - (SETTINGS.mailtrail_bounce_lookback_hours * 3600 * 1000) as i64;
            match self.graph.list_inbox_since(sender, since).await {
                Ok(messages) => {
                    let reports = extract_ndr_reports(&messages);
                    self.candidates.insert(sender.to_string(), reports);
                }
                Err(error) => {
                    // A 403 on one shared mailbox must not sink the batch.
                    warn!(sender, "Mailbox fetch failed, skipping sender: {error:?}");
                    self.summary.senders_failed += 1;
                    self.failed_senders.insert(sender.to_string());
                    return None;
                }
            }
        }
        self.candidates.get(sender).cloned()
    }

    async fn close_check(&mut self, check_id: u64, result: CheckResult) {
        if let Err(error) = PendingBounceCheck::mark_checked(check_id, result).await {
            warn!(check_id, "Failed to mark bounce check consumed: {error:?}");
        }
    }

    async fn collect_expired_checks(&mut self) {
        match PendingBounceCheck::purge_expired(SETTINGS.mailtrail_check_retention_days).await {
            Ok(removed) => self.summary.expired_checks_removed = removed as u64,
            Err(error) => warn!("Failed to purge expired bounce checks: {error:?}"),
        }
    }
}

/// NDR-shaped inbox messages parsed down to reports with a recipient.
fn extract_ndr_reports(messages: &[Message]) -> Vec<NdrReport> {
    messages
        .iter()
        .filter(|message| is_ndr_shaped(message.subject.as_deref(), message.from_address()))
        .map(|message| {
            let body = message
                .body
                .as_ref()
                .map(|b| b.content.as_str())
                .or(message.body_preview.as_deref());
            parse_ndr(message.subject.as_deref(), body)
        })
        .filter(|report| report.recipient.is_some())
        .collect()
}

/// Moves one email into the bounced state, exactly once.
///
/// The status re-check runs inside the store transaction, so a concurrent
/// open or a second reconciliation pass cannot double-apply; returns whether
/// this call performed the transition. Also used by the manual mark-bounced
/// endpoint.
pub async fn apply_bounce(
    email_id: u64,
    bounce_type: Option<BounceType>,
    reason: Option<String>,
) -> MailTrailResult<bool> {
    let now = utc_now!();
    let reason_in_tx = reason.clone();
    let previous = update_impl(
        DB_MANAGER.meta_db(),
        move |rw| {
            rw.get()
                .secondary::<OutboundEmail>(OutboundEmailKey::id, email_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("The email with id={email_id} that you want to mark bounced was not found."),
                        ErrorCode::ResourceNotFound
                    )
                })
        },
        move |current| {
            // Bounced is sticky; a repeat becomes an identity write.
            if current.status == EmailStatus::Bounced {
                return Ok(current.clone());
            }
            let mut updated = current.clone();
            updated.status = EmailStatus::Bounced;
            updated.bounce_type = Some(bounce_type.unwrap_or_else(|| {
                classify_bounce(reason_in_tx.as_deref().unwrap_or_default())
            }));
            updated.bounce_reason = reason_in_tx.map(|r| truncate_chars(&r, MAX_REASON_CHARS));
            updated.bounced_at = Some(now);
            // Bounced and opened are mutually exclusive.
            updated.open_count = 0;
            updated.unique_opens = 0;
            updated.opened_at = None;
            Ok(updated)
        },
    )
    .await?;

    if previous.status == EmailStatus::Bounced {
        return Ok(false);
    }

    // The open credit was premature; take it back.
    if previous.open_count > 0 {
        if let Some(contact_id) = previous.contact_id {
            if let Err(error) = Contact::reverse_open_credit(contact_id).await {
                warn!(contact_id, email_id, "Failed to reverse contact credit: {error:?}");
            }
        }
    }
    let body = match reason {
        Some(ref reason) => format!(
            "Delivery to {} failed: {}",
            previous.recipient_email, reason
        ),
        None => format!("Delivery to {} failed.", previous.recipient_email),
    };
    Notification::notify(&previous.sent_by, "Email bounced", &body, Some(email_id)).await;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sent_email(recipient: &str, sent_by: &str) -> OutboundEmail {
        let email = OutboundEmail::new(
            recipient.into(),
            None,
            "bounce-sender@corp.io".into(),
            "Bounce subject".into(),
            sent_by.into(),
        );
        email.save().await.unwrap();
        email
    }

    #[tokio::test]
    async fn apply_bounce_transitions_once() {
        let email = sent_email("once@acme.com", "bounce-owner-a@corp.io").await;

        let first = apply_bounce(email.id, None, Some("jane wasn't found at acme.com".into()))
            .await
            .unwrap();
        assert!(first);

        let second = apply_bounce(email.id, None, Some("another reason".into()))
            .await
            .unwrap();
        assert!(!second);

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Bounced);
        assert_eq!(row.bounce_type, Some(BounceType::Hard));
        assert_eq!(
            row.bounce_reason.as_deref(),
            Some("jane wasn't found at acme.com")
        );
        assert!(row.bounced_at.is_some());
    }

    #[tokio::test]
    async fn apply_bounce_zeroes_open_state_and_reverses_credit() {
        let contact = Contact::new("reversal@acme.com".into(), None);
        let contact_id = contact.id;
        contact.save().await.unwrap();
        Contact::credit_open(contact_id).await.unwrap();

        let mut email = OutboundEmail::new(
            "reversal@acme.com".into(),
            None,
            "bounce-sender@corp.io".into(),
            "Opened then bounced".into(),
            "bounce-owner-b@corp.io".into(),
        );
        email.contact_id = Some(contact_id);
        email.save().await.unwrap();

        // Simulate a counted open before the NDR surfaced.
        let id = email.id;
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<OutboundEmail>(OutboundEmailKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| raise_error!("missing".to_string(), ErrorCode::ResourceNotFound))
            },
            |current| {
                let mut updated = current.clone();
                updated.open_count = 1;
                updated.unique_opens = 1;
                updated.opened_at = Some(utc_now!());
                updated.status = EmailStatus::Opened;
                Ok(updated)
            },
        )
        .await
        .unwrap();

        let transitioned = apply_bounce(id, None, Some("The recipient's mailbox is full.".into()))
            .await
            .unwrap();
        assert!(transitioned);

        let row = OutboundEmail::get(id).await.unwrap().unwrap();
        assert_eq!(row.status, EmailStatus::Bounced);
        assert_eq!(row.bounce_type, Some(BounceType::Soft));
        assert_eq!(row.open_count, 0);
        assert_eq!(row.unique_opens, 0);
        assert_eq!(row.opened_at, None);

        let reversed = Contact::get(contact_id).await.unwrap().unwrap();
        assert_eq!(reversed.open_count, 0);
        assert_eq!(reversed.engagement_score, 0);
    }

    #[tokio::test]
    async fn explicit_bounce_type_wins_over_classification() {
        let email = sent_email("explicit-type@acme.com", "bounce-owner-c@corp.io").await;
        apply_bounce(
            email.id,
            Some(BounceType::Soft),
            Some("550 5.1.10 recipient not found".into()),
        )
        .await
        .unwrap();

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(row.bounce_type, Some(BounceType::Soft));
    }

    #[tokio::test]
    async fn bounce_notification_reaches_the_owner() {
        let email = sent_email("notify@acme.com", "bounce-owner-d@corp.io").await;
        apply_bounce(email.id, None, Some("access denied".into()))
            .await
            .unwrap();

        let notifications = Notification::list_for_user("bounce-owner-d@corp.io")
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].body.contains("notify@acme.com"));
        assert!(notifications[0].body.contains("access denied"));
    }

    #[test]
    fn ndr_reports_are_extracted_from_shaped_messages_only() {
        use crate::modules::graph::model::{EmailAddress, MessageBody, Recipient};

        let ndr = Message {
            id: "m1".into(),
            subject: Some("Undeliverable: Hello".into()),
            body: Some(MessageBody {
                content_type: "HTML".into(),
                content: "<p>Your message to jane@acme.com couldn't be delivered.</p>".into(),
            }),
            from: Some(Recipient {
                email_address: EmailAddress {
                    name: None,
                    address: Some("postmaster@outlook.com".into()),
                },
            }),
            ..Default::default()
        };
        let ordinary = Message {
            id: "m2".into(),
            subject: Some("Re: Hello".into()),
            body: Some(MessageBody {
                content_type: "Text".into(),
                content: "Thanks! jane@acme.com".into(),
            }),
            ..Default::default()
        };

        let reports = extract_ndr_reports(&[ndr, ordinary]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].recipient.as_deref(), Some("jane@acme.com"));
    }
}
