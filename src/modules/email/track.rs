// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use tracing::warn;

use crate::{
    modules::{
        crm::{contact::Contact, notification::Notification},
        database::{manager::DB_MANAGER, update_impl},
        email::entity::{EmailStatus, OutboundEmail, OutboundEmailKey},
        error::{code::ErrorCode, MailTrailError, MailTrailResult},
        metrics::MAILTRAIL_EMAIL_OPENS_TOTAL,
        settings::cli::SETTINGS,
    },
    raise_error, utc_now,
};

/// Substrings (lowercase) that mark a pixel fetch as non-human: crawlers,
/// link-preview agents, security gateways and script clients. Mail security
/// products fetch every image in a message before the recipient ever sees it.
const BOT_SIGNATURES: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scan",
    "preview",
    "proxy",
    "curl",
    "wget",
    "python-requests",
    "go-http-client",
    "headless",
    "phantomjs",
    "facebookexternalhit",
    "whatsapp",
    "telegram",
    "barracuda",
    "mimecast",
    "proofpoint",
    "messagelabs",
    "symantec",
    "trendmicro",
];

/// What a pixel fetch turned out to be. The tracking endpoint logs and counts
/// the outcome but always answers with the pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// User-Agent missing or matching a bot signature.
    BotSuppressed,
    /// No OutboundEmail row with that id.
    NotFound,
    /// The email already bounced; opens on it are meaningless.
    AlreadyBounced,
    /// Fetched sooner after the send than a human plausibly could.
    Premature,
    Counted {
        unique: bool,
        /// True on the first counted open of the email's life.
        first: bool,
    },
}

impl OpenOutcome {
    pub fn metric_label(&self) -> &'static str {
        match self {
            OpenOutcome::BotSuppressed => "bot",
            OpenOutcome::NotFound => "not_found",
            OpenOutcome::AlreadyBounced => "bounced",
            OpenOutcome::Premature => "premature",
            OpenOutcome::Counted { .. } => "counted",
        }
    }
}

/// Applies one pixel fetch to the email's open counters.
///
/// Counter updates run in a single read-modify-write transaction; the bounce
/// re-check inside it keeps a concurrent bounce transition sticky. First-open
/// side effects (owner notification, contact credit) are best-effort.
pub async fn record_open(
    email_id: u64,
    ip: Option<String>,
    user_agent: Option<&str>,
) -> MailTrailResult<OpenOutcome> {
    if !is_plausible_client(user_agent) {
        mark_invalid_open(email_id).await?;
        return Ok(OpenOutcome::BotSuppressed);
    }

    let Some(email) = OutboundEmail::get(email_id).await? else {
        return Ok(OpenOutcome::NotFound);
    };
    if email.bounce_type.is_some() || email.status == EmailStatus::Bounced {
        return Ok(OpenOutcome::AlreadyBounced);
    }

    let now = utc_now!();
    if now - email.sent_at < (SETTINGS.mailtrail_open_min_delay_secs * 1000) as i64 {
        mark_invalid_open(email_id).await?;
        return Ok(OpenOutcome::Premature);
    }

    let ip_in_tx = ip.clone();
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
            // Bounced may have landed since the pre-check; leave the row as-is.
            if current.status == EmailStatus::Bounced || current.bounce_type.is_some() {
                return Ok(current.clone());
            }
            let mut updated = current.clone();
            updated.open_count += 1;
            if open_is_unique(current, ip_in_tx.as_deref(), now) {
                updated.unique_opens += 1;
            }
            if current.open_count == 0 {
                updated.opened_at = Some(now);
                updated.first_open_ip = ip_in_tx.clone();
                // Replied stays Replied; only forward transitions.
                if matches!(current.status, EmailStatus::Sent | EmailStatus::Delivered) {
                    updated.status = EmailStatus::Opened;
                }
            }
            updated.last_open_ip = ip_in_tx.clone();
            updated.last_open_at = Some(now);
            Ok(updated)
        },
    )
    .await?;

    if previous.status == EmailStatus::Bounced || previous.bounce_type.is_some() {
        return Ok(OpenOutcome::AlreadyBounced);
    }

    MAILTRAIL_EMAIL_OPENS_TOTAL.inc();
    let first = previous.open_count == 0;
    let unique = open_is_unique(&previous, ip.as_deref(), now);
    if first {
        Notification::notify(
            &previous.sent_by,
            "Email opened",
            &format!(
                "{} opened \"{}\"",
                previous.recipient_email, previous.subject
            ),
            Some(email_id),
        )
        .await;
        if let Some(contact_id) = previous.contact_id {
            if let Err(error) = Contact::credit_open(contact_id).await {
                warn!(contact_id, email_id, "Failed to credit contact open: {error:?}");
            }
        }
    }
    Ok(OpenOutcome::Counted { unique, first })
}

fn is_plausible_client(user_agent: Option<&str>) -> bool {
    let Some(user_agent) = user_agent else {
        return false;
    };
    let lowered = user_agent.to_lowercase();
    if lowered.trim().is_empty() {
        return false;
    }
    !BOT_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
}

/// A counted open is unique when it is the first ever, comes from a new IP,
/// or the last counted open from that IP fell out of the dedup window.
fn open_is_unique(previous: &OutboundEmail, ip: Option<&str>, now: i64) -> bool {
    if previous.open_count == 0 {
        return true;
    }
    if previous.last_open_ip.as_deref() != ip {
        return true;
    }
    match previous.last_open_at {
        Some(last) => now - last > (SETTINGS.mailtrail_open_dedup_window_secs * 1000) as i64,
        None => true,
    }
}

/// Flags the row so reporting can discount it; a missing row is fine here.
async fn mark_invalid_open(email_id: u64) -> MailTrailResult<()> {
    let result = update_impl(
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
        |current| {
            let mut updated = current.clone();
            updated.is_valid_open = false;
            Ok(updated)
        },
    )
    .await;
    match result {
        Ok(_) => Ok(()),
        Err(MailTrailError::Generic {
            code: ErrorCode::ResourceNotFound,
            ..
        }) => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn deliverable_email(recipient: &str, sent_by: &str) -> OutboundEmail {
        let mut email = OutboundEmail::new(
            recipient.into(),
            None,
            "track-sender@corp.io".into(),
            "Tracked subject".into(),
            sent_by.into(),
        );
        // Old enough that the prefetch guard does not fire.
        email.sent_at = utc_now!() - 60_000;
        email.created_at = email.sent_at;
        email.save().await.unwrap();
        email
    }

    #[tokio::test]
    async fn bot_user_agent_is_suppressed_and_invalidates_row() {
        let email = deliverable_email("bot-target@acme.com", "owner@corp.io").await;
        let outcome = record_open(email.id, Some("10.0.0.1".into()), Some("Googlebot/2.1"))
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::BotSuppressed);

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert!(!row.is_valid_open);
        assert_eq!(row.open_count, 0);
        assert_eq!(row.status, EmailStatus::Sent);
    }

    #[tokio::test]
    async fn missing_user_agent_is_suppressed() {
        let email = deliverable_email("no-ua@acme.com", "owner@corp.io").await;
        let outcome = record_open(email.id, Some("10.0.0.1".into()), None)
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::BotSuppressed);
    }

    #[tokio::test]
    async fn unknown_email_id_is_a_noop() {
        let outcome = record_open(987654321, Some("10.0.0.1".into()), Some("Mozilla/5.0"))
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::NotFound);
    }

    #[tokio::test]
    async fn premature_fetch_never_counts() {
        let email = OutboundEmail::new(
            "prefetch@acme.com".into(),
            None,
            "track-sender@corp.io".into(),
            "Fresh".into(),
            "owner@corp.io".into(),
        );
        email.save().await.unwrap();

        let outcome = record_open(email.id, Some("10.0.0.1".into()), Some("Mozilla/5.0"))
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::Premature);

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert!(!row.is_valid_open);
        assert_eq!(row.open_count, 0);
    }

    #[tokio::test]
    async fn bounced_email_cannot_be_opened() {
        let email = deliverable_email("bounced@acme.com", "owner@corp.io").await;
        // Write the bounce state the way the reconciler would.
        let id = email.id;
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<OutboundEmail>(OutboundEmailKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| raise_error!("missing".to_string(), ErrorCode::ResourceNotFound))
            },
            move |current| {
                let mut updated = current.clone();
                updated.status = EmailStatus::Bounced;
                updated.bounce_type = Some(crate::modules::email::entity::BounceType::Hard);
                Ok(updated)
            },
        )
        .await
        .unwrap();

        let outcome = record_open(id, Some("10.0.0.1".into()), Some("Mozilla/5.0"))
            .await
            .unwrap();
        assert_eq!(outcome, OpenOutcome::AlreadyBounced);
        let row = OutboundEmail::get(id).await.unwrap().unwrap();
        assert_eq!(row.open_count, 0);
    }

    #[tokio::test]
    async fn repeat_fetches_dedup_within_window_and_count_beyond_it() {
        let email = deliverable_email("repeat@acme.com", "repeat-owner@corp.io").await;
        let ua = Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64)");

        let first = record_open(email.id, Some("10.0.0.1".into()), ua).await.unwrap();
        assert_eq!(
            first,
            OpenOutcome::Counted {
                unique: true,
                first: true
            }
        );

        let second = record_open(email.id, Some("10.0.0.1".into()), ua).await.unwrap();
        assert_eq!(
            second,
            OpenOutcome::Counted {
                unique: false,
                first: false
            }
        );

        // Age the last counted open past the dedup window.
        let id = email.id;
        let stale = utc_now!() - 301_000;
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<OutboundEmail>(OutboundEmailKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| raise_error!("missing".to_string(), ErrorCode::ResourceNotFound))
            },
            move |current| {
                let mut updated = current.clone();
                updated.last_open_at = Some(stale);
                Ok(updated)
            },
        )
        .await
        .unwrap();

        let third = record_open(email.id, Some("10.0.0.1".into()), ua).await.unwrap();
        assert_eq!(
            third,
            OpenOutcome::Counted {
                unique: true,
                first: false
            }
        );

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(row.open_count, 3);
        assert_eq!(row.unique_opens, 2);
        assert_eq!(row.status, EmailStatus::Opened);
        assert!(row.opened_at.is_some());
        assert_eq!(row.first_open_ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn new_ip_inside_window_is_unique() {
        let email = deliverable_email("two-ips@acme.com", "owner@corp.io").await;
        let ua = Some("Mozilla/5.0");

        record_open(email.id, Some("10.0.0.1".into()), ua).await.unwrap();
        let outcome = record_open(email.id, Some("10.0.0.2".into()), ua).await.unwrap();
        assert_eq!(
            outcome,
            OpenOutcome::Counted {
                unique: true,
                first: false
            }
        );

        let row = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(row.open_count, 2);
        assert_eq!(row.unique_opens, 2);
        assert_eq!(row.last_open_ip.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn first_open_notifies_owner_and_credits_contact() {
        let contact = Contact::new("credit-target@acme.com".into(), Some("Jane".into()));
        let contact_id = contact.id;
        contact.save().await.unwrap();

        let mut email = OutboundEmail::new(
            "credit-target@acme.com".into(),
            Some("Jane".into()),
            "track-sender@corp.io".into(),
            "Contact credit".into(),
            "credit-owner@corp.io".into(),
        );
        email.sent_at = utc_now!() - 60_000;
        email.created_at = email.sent_at;
        email.contact_id = Some(contact_id);
        email.save().await.unwrap();

        record_open(email.id, Some("10.0.0.9".into()), Some("Mozilla/5.0"))
            .await
            .unwrap();

        let updated = Contact::get(contact_id).await.unwrap().unwrap();
        assert_eq!(updated.open_count, 1);
        assert_eq!(updated.engagement_score, 5);

        let notifications = Notification::list_for_user("credit-owner@corp.io")
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].email_id, Some(email.id));
    }

    #[test]
    fn bot_signatures_catch_common_agents() {
        assert!(!is_plausible_client(Some("Googlebot/2.1")));
        assert!(!is_plausible_client(Some("Mozilla/5.0 (compatible; bingbot/2.0)")));
        assert!(!is_plausible_client(Some("curl/8.1.2")));
        assert!(!is_plausible_client(Some("python-requests/2.32")));
        assert!(!is_plausible_client(Some("Barracuda Sentinel (EE)")));
        assert!(!is_plausible_client(Some("   ")));
        assert!(!is_plausible_client(None));
        assert!(is_plausible_client(Some(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
        )));
    }
}
