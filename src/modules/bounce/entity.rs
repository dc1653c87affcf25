// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::{
    id,
    modules::{
        database::{batch_delete_impl, insert_impl, list_all_impl, manager::DB_MANAGER, update_impl},
        error::{code::ErrorCode, MailTrailResult},
        settings::cli::SETTINGS,
    },
    raise_error, utc_now,
};
use itertools::Itertools;
use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

/// Outcome recorded when a queued check is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckResult {
    /// No NDR matching the recipient was found at check time.
    Ok,
    /// The check located an NDR and the email was marked bounced.
    Bounced,
}

/// Deferred per-send bounce probe. Enqueued right after a successful send and
/// consumed exactly once by the pending pass; expired rows are swept
/// regardless of state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[native_model(id = 2, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct PendingBounceCheck {
    #[secondary_key(unique)]
    pub id: u64,
    /// Id of the OutboundEmail this check watches.
    pub email_id: u64,
    /// Mailbox to poll for the NDR.
    pub sender_email: String,
    /// Lowercased, matched against parsed NDR recipients.
    pub recipient_email: String,
    /// Epoch ms before which the check is not due.
    pub check_after: i64,
    pub checked: bool,
    pub check_result: Option<CheckResult>,
    pub created_at: i64,
}

impl PendingBounceCheck {
    // Timestamp-prefixed key keeps primary scans in enqueue order.
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn new(email_id: u64, sender_email: &str, recipient_email: &str) -> Self {
        let now = utc_now!();
        Self {
            id: id!(64),
            email_id,
            sender_email: sender_email.to_string(),
            recipient_email: recipient_email.to_lowercase(),
            check_after: now + (SETTINGS.mailtrail_bounce_check_delay_secs * 1000) as i64,
            checked: false,
            check_result: None,
            created_at: now,
        }
    }

    pub async fn enqueue(self) -> MailTrailResult<()> {
        insert_impl(DB_MANAGER.meta_db(), self).await
    }

    /// Unconsumed checks whose delay has elapsed, oldest first (primary scan
    /// order is enqueue order), capped at `limit`.
    pub async fn due(limit: usize) -> MailTrailResult<Vec<PendingBounceCheck>> {
        let now = utc_now!();
        let mut due: Vec<PendingBounceCheck> = list_all_impl(DB_MANAGER.meta_db())
            .await?
            .into_iter()
            .filter(|check: &PendingBounceCheck| !check.checked && check.check_after <= now)
            .collect();
        due.truncate(limit);
        Ok(due)
    }

    pub async fn mark_checked(id: u64, result: CheckResult) -> MailTrailResult<()> {
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<PendingBounceCheck>(PendingBounceCheckKey::id, id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!(
                                "The pending bounce check with id={id} that you want to modify was not found."
                            ),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                updated.checked = true;
                updated.check_result = Some(result);
                Ok(updated)
            },
        )
        .await?;
        Ok(())
    }

    /// Removes checks enqueued before the retention cutoff, consumed or not.
    pub async fn purge_expired(retention_days: u64) -> MailTrailResult<usize> {
        let cutoff = utc_now!() - (retention_days * 24 * 3600 * 1000) as i64;
        batch_delete_impl(DB_MANAGER.meta_db(), move |rw| {
            let stale: Vec<PendingBounceCheck> = rw
                .scan()
                .primary()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .range(..format!("{cutoff}_"))
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .try_collect()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            Ok(stale)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_sets_delay_and_due_respects_it() {
        let check = PendingBounceCheck::new(10001, "Sender@Corp.example", "Target@Acme.example");
        assert_eq!(check.recipient_email, "target@acme.example");
        assert_eq!(check.sender_email, "Sender@Corp.example");
        assert!(check.check_after >= check.created_at + 45_000);
        let id = check.id;
        check.enqueue().await.unwrap();

        // Delay has not elapsed, so the fresh check is not due.
        let due = PendingBounceCheck::due(50).await.unwrap();
        assert!(!due.iter().any(|c| c.id == id));
    }

    #[tokio::test]
    async fn mark_checked_consumes_a_check() {
        let mut check = PendingBounceCheck::new(10002, "a@corp.example", "b@acme.example");
        check.check_after = check.created_at; // already due
        let id = check.id;
        check.enqueue().await.unwrap();

        let due = PendingBounceCheck::due(50).await.unwrap();
        assert!(due.iter().any(|c| c.id == id));

        PendingBounceCheck::mark_checked(id, CheckResult::Ok)
            .await
            .unwrap();
        let due = PendingBounceCheck::due(50).await.unwrap();
        assert!(!due.iter().any(|c| c.id == id));
    }

    #[tokio::test]
    async fn purge_removes_old_rows_even_when_consumed() {
        let mut check = PendingBounceCheck::new(10003, "a@corp.example", "c@acme.example");
        check.created_at -= 8 * 24 * 3600 * 1000;
        check.check_after = check.created_at;
        check.checked = true;
        check.check_result = Some(CheckResult::Bounced);
        let id = check.id;
        check.enqueue().await.unwrap();

        let removed = PendingBounceCheck::purge_expired(7).await.unwrap();
        assert!(removed >= 1);
        let all: Vec<PendingBounceCheck> = list_all_impl(DB_MANAGER.meta_db()).await.unwrap();
        assert!(!all.iter().any(|c| c.id == id));
    }
}
