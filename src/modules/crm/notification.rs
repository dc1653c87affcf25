// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::{
    id,
    modules::{
        database::{filter_by_secondary_key_impl, insert_impl, manager::DB_MANAGER},
        error::MailTrailResult,
        metrics::{FAILURE, MAILTRAIL_NOTIFICATIONS_TOTAL, SUCCESS},
    },
    utc_now,
};
use native_db::*;
use native_model::{native_model, Model};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// In-app alert for the user who sent a tracked email (opened / bounced /
/// replied). Insert-only from this service; the CRM UI owns the read flag.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, Object)]
#[native_model(id = 5, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct Notification {
    #[secondary_key(unique)]
    pub id: u64,
    /// Recipient of the alert, the `sent_by` of the originating email.
    #[secondary_key]
    pub user: String,
    pub title: String,
    pub body: String,
    pub email_id: Option<u64>,
    pub read: bool,
    pub created_at: i64,
}

impl Notification {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn new(user: String, title: String, body: String, email_id: Option<u64>) -> Self {
        Self {
            id: id!(64),
            user,
            title,
            body,
            email_id,
            read: false,
            created_at: utc_now!(),
        }
    }

    pub async fn save(&self) -> MailTrailResult<()> {
        insert_impl(DB_MANAGER.meta_db(), self.clone()).await
    }

    pub async fn list_for_user(user: &str) -> MailTrailResult<Vec<Notification>> {
        filter_by_secondary_key_impl(
            DB_MANAGER.meta_db(),
            NotificationKey::user,
            user.to_string(),
        )
        .await
    }

    /// Best-effort insert: notification loss must never fail the lifecycle
    /// transition that triggered it, so failures are logged and swallowed.
    pub async fn notify(user: &str, title: &str, body: &str, email_id: Option<u64>) {
        let notification = Notification::new(user.into(), title.into(), body.into(), email_id);
        match notification.save().await {
            Ok(()) => {
                MAILTRAIL_NOTIFICATIONS_TOTAL
                    .with_label_values(&[SUCCESS])
                    .inc();
            }
            Err(error) => {
                MAILTRAIL_NOTIFICATIONS_TOTAL
                    .with_label_values(&[FAILURE])
                    .inc();
                warn!(user, title, "Failed to record notification: {error:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_inserts_unread_row() {
        Notification::notify(
            "notify-owner@corp.io",
            "Email opened",
            "jane opened it",
            Some(7),
        )
        .await;

        let rows = Notification::list_for_user("notify-owner@corp.io").await.unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(!row.read);
        assert_eq!(row.title, "Email opened");
        assert_eq!(row.email_id, Some(7));
    }
}
