// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::{
    id,
    modules::{
        database::{async_find_impl, insert_impl, manager::DB_MANAGER, update_impl},
        error::{code::ErrorCode, MailTrailResult},
    },
    raise_error, utc_now,
};
use native_db::*;
use native_model::{native_model, Model};
use poem_openapi::Object;
use serde::{Deserialize, Serialize};

const MAX_ENGAGEMENT: u32 = 100;
const ENGAGEMENT_OPEN_BONUS: u32 = 5;

/// CRM contact counters adjusted by the tracking pipeline. MailTrail only
/// touches `open_count` and `engagement_score`; everything else about a
/// contact is owned by the CRM proper.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, Object)]
#[native_model(id = 4, version = 1)]
#[native_db]
pub struct Contact {
    #[primary_key]
    pub id: u64,
    #[secondary_key(unique)]
    pub email: String,
    pub name: Option<String>,
    /// Number of tracked emails this contact has opened at least once.
    pub open_count: u32,
    /// Engagement score, bounded to 0..=100.
    pub engagement_score: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Contact {
    pub fn new(email: String, name: Option<String>) -> Self {
        Self {
            id: id!(64),
            email,
            name,
            open_count: 0,
            engagement_score: 0,
            created_at: utc_now!(),
            updated_at: utc_now!(),
        }
    }

    pub async fn save(&self) -> MailTrailResult<()> {
        insert_impl(DB_MANAGER.meta_db(), self.clone()).await
    }

    pub async fn get(id: u64) -> MailTrailResult<Option<Contact>> {
        async_find_impl::<Contact>(DB_MANAGER.meta_db(), id).await
    }

    /// First qualifying open of a tracked email: +1 open, +5 engagement,
    /// capped at the score ceiling.
    pub async fn credit_open(contact_id: u64) -> MailTrailResult<()> {
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .primary::<Contact>(contact_id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("The contact with id={contact_id} to credit was not found."),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            |current| {
                let mut updated = current.clone();
                updated.open_count += 1;
                updated.engagement_score =
                    (updated.engagement_score + ENGAGEMENT_OPEN_BONUS).min(MAX_ENGAGEMENT);
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await?;
        Ok(())
    }

    /// Takes back a previously credited open when the email turns out to have
    /// bounced. Both counters floor at zero.
    pub async fn reverse_open_credit(contact_id: u64) -> MailTrailResult<()> {
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .primary::<Contact>(contact_id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!(
                                "The contact with id={contact_id} to debit was not found."
                            ),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            |current| {
                let mut updated = current.clone();
                updated.open_count = updated.open_count.saturating_sub(1);
                updated.engagement_score = updated
                    .engagement_score
                    .saturating_sub(ENGAGEMENT_OPEN_BONUS);
                updated.updated_at = utc_now!();
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
    async fn credit_caps_engagement_at_ceiling() {
        let mut contact = Contact::new("cap@acme.com".into(), None);
        contact.engagement_score = 98;
        let id = contact.id;
        contact.save().await.unwrap();

        Contact::credit_open(id).await.unwrap();
        let updated = Contact::get(id).await.unwrap().unwrap();
        assert_eq!(updated.open_count, 1);
        assert_eq!(updated.engagement_score, 100);
    }

    #[tokio::test]
    async fn reverse_floors_at_zero() {
        let mut contact = Contact::new("floor@acme.com".into(), None);
        contact.engagement_score = 2;
        let id = contact.id;
        contact.save().await.unwrap();

        Contact::reverse_open_credit(id).await.unwrap();
        let updated = Contact::get(id).await.unwrap().unwrap();
        assert_eq!(updated.open_count, 0);
        assert_eq!(updated.engagement_score, 0);
    }

    #[tokio::test]
    async fn credit_missing_contact_is_not_found() {
        let result = Contact::credit_open(404_404).await;
        assert!(result.is_err());
    }
}
