// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::{
    id,
    modules::{
        database::{
            filter_by_secondary_key_impl, insert_impl, manager::DB_MANAGER, secondary_find_impl,
        },
        error::MailTrailResult,
        utils::truncate_chars,
    },
    utc_now,
};
use native_db::*;
use native_model::{native_model, Model};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};

const MAX_PREVIEW_CHARS: usize = 255;

/// One detected reply to a tracked email. Immutable once written; the unique
/// dedup key makes a repeated reconciliation of the same provider message a
/// no-op.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Object)]
#[native_model(id = 3, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct EmailReply {
    #[secondary_key(unique)]
    pub id: u64,
    /// Id of the OutboundEmail this reply belongs to.
    #[secondary_key]
    pub email_id: u64,
    /// `"{email_id}:{provider_message_id}"`.
    #[secondary_key(unique)]
    pub dedup_key: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub subject: Option<String>,
    /// First characters of the reply body.
    pub body_preview: Option<String>,
    /// When the provider received the reply, epoch milliseconds.
    pub received_at: i64,
    /// Internet message id of the reply itself.
    pub provider_message_id: String,
    pub created_at: i64,
}

impl EmailReply {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        email_id: u64,
        from_email: String,
        from_name: Option<String>,
        subject: Option<String>,
        body_preview: Option<String>,
        received_at: i64,
        provider_message_id: String,
    ) -> Self {
        Self {
            id: id!(64),
            email_id,
            dedup_key: Self::dedup_key(email_id, &provider_message_id),
            from_email,
            from_name,
            subject,
            body_preview: body_preview.map(|p| truncate_chars(&p, MAX_PREVIEW_CHARS)),
            received_at,
            provider_message_id,
            created_at: utc_now!(),
        }
    }

    fn dedup_key(email_id: u64, provider_message_id: &str) -> String {
        format!("{email_id}:{provider_message_id}")
    }

    pub async fn save(&self) -> MailTrailResult<()> {
        insert_impl(DB_MANAGER.meta_db(), self.clone()).await
    }

    /// True when this provider message already produced a row for the email.
    pub async fn exists_for(email_id: u64, provider_message_id: &str) -> MailTrailResult<bool> {
        let found: Option<EmailReply> = secondary_find_impl(
            DB_MANAGER.meta_db(),
            EmailReplyKey::dedup_key,
            Self::dedup_key(email_id, provider_message_id),
        )
        .await?;
        Ok(found.is_some())
    }

    pub async fn list_for_email(email_id: u64) -> MailTrailResult<Vec<EmailReply>> {
        filter_by_secondary_key_impl(DB_MANAGER.meta_db(), EmailReplyKey::email_id, email_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_key_guards_against_double_insert() {
        let reply = EmailReply::new(
            20001,
            "jane@acme.com".into(),
            Some("Jane".into()),
            Some("Re: Quarterly report".into()),
            Some("Looks good!".into()),
            utc_now!(),
            "<reply-1@acme.com>".into(),
        );
        reply.save().await.unwrap();

        assert!(EmailReply::exists_for(20001, "<reply-1@acme.com>")
            .await
            .unwrap());
        assert!(!EmailReply::exists_for(20001, "<reply-2@acme.com>")
            .await
            .unwrap());
        assert!(!EmailReply::exists_for(20002, "<reply-1@acme.com>")
            .await
            .unwrap());

        // Same provider message again: the unique key rejects it.
        let duplicate = EmailReply::new(
            20001,
            "jane@acme.com".into(),
            None,
            None,
            None,
            utc_now!(),
            "<reply-1@acme.com>".into(),
        );
        assert!(duplicate.save().await.is_err());
    }

    #[tokio::test]
    async fn preview_is_truncated() {
        let reply = EmailReply::new(
            20003,
            "jane@acme.com".into(),
            None,
            None,
            Some("x".repeat(400)),
            utc_now!(),
            "<reply-3@acme.com>".into(),
        );
        assert_eq!(reply.body_preview.as_ref().unwrap().chars().count(), 255);
        reply.save().await.unwrap();

        let listed = EmailReply::list_for_email(20003).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
