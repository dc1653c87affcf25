// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::{
    id,
    modules::{
        database::{
            insert_impl, list_all_impl, manager::DB_MANAGER,
            paginate_query_primary_scan_all_impl, secondary_find_impl, update_impl, Paginated,
        },
        error::{code::ErrorCode, MailTrailResult},
    },
    raise_error, utc_now,
};
use native_db::*;
use native_model::{native_model, Model};
use poem_openapi::{Enum, Object};
use serde::{Deserialize, Serialize};

/// Delivery lifecycle of a tracked email.
///
/// `Delivered` exists for external writers with a delivery-receipt source;
/// the poll-based core itself never sets it.
#[derive(Clone, Copy, Debug, Eq, Default, PartialEq, Serialize, Deserialize, Hash, Enum)]
pub enum EmailStatus {
    #[default]
    Sent,
    Delivered,
    Opened,
    Bounced,
    Replied,
}

#[derive(Clone, Copy, Debug, Eq, Default, PartialEq, Serialize, Deserialize, Hash, Enum)]
pub enum BounceType {
    /// Permanent failure: address rejected, mailbox gone.
    #[default]
    Hard,
    /// Transient failure: mailbox full, greylisting, provider hiccup.
    Soft,
}

/// One row per send attempt. Rows are created by the send orchestrator and
/// mutated by the tracking endpoint and the reconciliation services; they are
/// never deleted here.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, Object)]
#[native_model(id = 1, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct OutboundEmail {
    #[secondary_key(unique)]
    pub id: u64,
    pub created_at: i64,
    /// When the graph send call was issued, epoch milliseconds.
    pub sent_at: i64,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    #[secondary_key]
    pub sender_email: String,
    pub subject: String,
    /// The rendered, inline-styled HTML that actually went out.
    pub body_html: String,
    /// Owning CRM user; notifications about this email go to them.
    pub sent_by: String,
    pub status: EmailStatus,
    pub open_count: u32,
    pub unique_opens: u32,
    pub first_open_ip: Option<String>,
    pub opened_at: Option<i64>,
    /// IP and time of the last counted open, consulted by the dedup window.
    pub last_open_ip: Option<String>,
    pub last_open_at: Option<i64>,
    /// False once a fetch was attributed to a bot/scanner or a prefetch.
    pub is_valid_open: bool,
    pub bounce_type: Option<BounceType>,
    pub bounce_reason: Option<String>,
    pub bounced_at: Option<i64>,
    /// Provider-assigned internet message id, captured best-effort after the
    /// send; replies are threaded against it.
    pub message_id: Option<String>,
    pub reply_count: u32,
    pub replied_at: Option<i64>,
    pub last_reply_at: Option<i64>,
    pub contact_id: Option<u64>,
    pub lead_id: Option<u64>,
    pub account_id: Option<u64>,
}

impl OutboundEmail {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn new(
        recipient_email: String,
        recipient_name: Option<String>,
        sender_email: String,
        subject: String,
        sent_by: String,
    ) -> Self {
        let now = utc_now!();
        Self {
            id: id!(64),
            created_at: now,
            sent_at: now,
            recipient_email,
            recipient_name,
            sender_email,
            subject,
            body_html: String::new(),
            sent_by,
            status: EmailStatus::Sent,
            open_count: 0,
            unique_opens: 0,
            first_open_ip: None,
            opened_at: None,
            last_open_ip: None,
            last_open_at: None,
            is_valid_open: true,
            bounce_type: None,
            bounce_reason: None,
            bounced_at: None,
            message_id: None,
            reply_count: 0,
            replied_at: None,
            last_reply_at: None,
            contact_id: None,
            lead_id: None,
            account_id: None,
        }
    }

    pub async fn save(&self) -> MailTrailResult<()> {
        insert_impl(DB_MANAGER.meta_db(), self.clone()).await
    }

    pub async fn get(id: u64) -> MailTrailResult<Option<OutboundEmail>> {
        secondary_find_impl(DB_MANAGER.meta_db(), OutboundEmailKey::id, id).await
    }

    /// Rows sent at or after `cutoff` (epoch ms). The store is scanned in
    /// primary-key order, which is creation order, so the filter is cheap.
    pub async fn list_sent_since(cutoff: i64) -> MailTrailResult<Vec<OutboundEmail>> {
        let all: Vec<OutboundEmail> = list_all_impl(DB_MANAGER.meta_db()).await?;
        Ok(all.into_iter().filter(|e| e.sent_at >= cutoff).collect())
    }

    pub async fn paginate_list(
        page: Option<u64>,
        page_size: Option<u64>,
        desc: Option<bool>,
    ) -> MailTrailResult<Paginated<OutboundEmail>> {
        paginate_query_primary_scan_all_impl(DB_MANAGER.meta_db(), page, page_size, desc).await
    }

    /// Persists the rendered body right before the outbound call and stamps
    /// `sent_at` with the actual send moment, so a rejected send still leaves
    /// a faithful audit record.
    pub async fn attach_rendered_body(id: u64, body_html: String) -> MailTrailResult<()> {
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<OutboundEmail>(OutboundEmailKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!(
                                "The email with id={id} that you want to modify was not found."
                            ),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                updated.body_html = body_html;
                updated.sent_at = utc_now!();
                Ok(updated)
            },
        )
        .await?;
        Ok(())
    }

    /// Back-fills the provider message id captured from Sent Items.
    pub async fn set_message_id(id: u64, message_id: String) -> MailTrailResult<()> {
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<OutboundEmail>(OutboundEmailKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!(
                                "The email with id={id} that you want to modify was not found."
                            ),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                updated.message_id = Some(message_id);
                Ok(updated)
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_through_store() {
        let mut email = OutboundEmail::new(
            "rt-recipient@acme.com".into(),
            Some("Jane".into()),
            "rt-sender@corp.io".into(),
            "Quarterly report".into(),
            "owner@corp.io".into(),
        );
        email.contact_id = Some(99);
        email.save().await.unwrap();

        let loaded = OutboundEmail::get(email.id).await.unwrap().unwrap();
        assert_eq!(loaded.recipient_email, "rt-recipient@acme.com");
        assert_eq!(loaded.status, EmailStatus::Sent);
        assert!(loaded.is_valid_open);
        assert_eq!(loaded.contact_id, Some(99));
        assert_eq!(loaded.open_count, 0);
    }

    #[tokio::test]
    async fn list_sent_since_filters_by_window() {
        let mut old = OutboundEmail::new(
            "old@acme.com".into(),
            None,
            "window-sender@corp.io".into(),
            "Old".into(),
            "owner@corp.io".into(),
        );
        old.sent_at = utc_now!() - 10_000;
        old.save().await.unwrap();

        let fresh = OutboundEmail::new(
            "fresh@acme.com".into(),
            None,
            "window-sender@corp.io".into(),
            "Fresh".into(),
            "owner@corp.io".into(),
        );
        fresh.save().await.unwrap();

        let cutoff = utc_now!() - 5_000;
        let recent = OutboundEmail::list_sent_since(cutoff).await.unwrap();
        assert!(recent.iter().any(|e| e.id == fresh.id));
        assert!(!recent.iter().any(|e| e.id == old.id));
    }
}
