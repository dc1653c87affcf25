use crate::modules::bounce::entity::PendingBounceCheck;
use crate::modules::crm::contact::Contact;
use crate::modules::crm::notification::Notification;
use crate::modules::email::entity::OutboundEmail;
use crate::modules::error::{MailTrailError, MailTrailResult};
use crate::modules::reply::entity::EmailReply;
use crate::raise_error;
use db_type::{KeyOptions, ToKeyDefinition};
use itertools::Itertools;
use native_db::*;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use transaction::RwTransaction;

use super::error::code::ErrorCode;
pub mod manager;

pub static META_MODELS: LazyLock<Models> = LazyLock::new(|| {
    let mut adapter = ModelsAdapter::new();
    adapter.register_metadata_models();
    adapter.models
});

pub struct ModelsAdapter {
    pub models: Models,
}

impl ModelsAdapter {
    pub fn new() -> Self {
        ModelsAdapter {
            models: Models::new(),
        }
    }

    pub fn register_model<T: ToInput>(&mut self) {
        self.models.define::<T>().expect("failed to define model");
    }

    /// Every table of the lifecycle store. A model missing here is invisible
    /// to the database even if its type exists.
    pub fn register_metadata_models(&mut self) {
        self.register_model::<OutboundEmail>();
        self.register_model::<PendingBounceCheck>();
        self.register_model::<EmailReply>();
        self.register_model::<Contact>();
        self.register_model::<Notification>();
    }
}

/// Store and join failures never carry domain meaning; they all surface as
/// internal errors with the debug representation attached.
fn store_err<E: std::fmt::Debug>(e: E) -> MailTrailError {
    raise_error!(format!("{:#?}", e), ErrorCode::InternalError)
}

pub async fn insert_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    item: T,
) -> MailTrailResult<()> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let rw = db.rw_transaction().map_err(store_err)?;
        rw.insert(item).map_err(store_err)?;
        rw.commit().map_err(store_err)?;
        Ok(())
    })
    .await
    .map_err(store_err)?
}

/// One read-modify-write cycle in a single transaction: `read` fetches the
/// row, `apply` derives the replacement. Returns the row as it was BEFORE
/// the write, which is how callers detect first transitions (first open,
/// first reply, fresh bounce) without a second lookup.
pub async fn update_impl<T: ToInput + Clone + std::fmt::Debug + Send + 'static>(
    database: &Arc<Database<'static>>,
    read: impl FnOnce(&RwTransaction) -> MailTrailResult<T> + Send + 'static,
    apply: impl FnOnce(&T) -> MailTrailResult<T> + Send + 'static,
) -> MailTrailResult<T> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let rw = db.rw_transaction().map_err(store_err)?;
        let current = read(&rw)?;
        let updated = apply(&current)?;
        rw.update(current.clone(), updated).map_err(store_err)?;
        rw.commit().map_err(store_err)?;
        Ok(current)
    })
    .await
    .map_err(store_err)?
}

pub async fn async_find_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    key: impl ToKey + Send + 'static,
) -> MailTrailResult<Option<T>> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r = db.r_transaction().map_err(store_err)?;
        let entity: Option<T> = r.get().primary(key).map_err(store_err)?;
        Ok(entity)
    })
    .await
    .map_err(store_err)?
}

/// Selects rows with `delete`, removes them, commits once. Returns how many
/// went; the selection and the removal share the transaction, so a row
/// cannot slip in between.
pub async fn batch_delete_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    delete: impl FnOnce(&RwTransaction) -> MailTrailResult<Vec<T>> + Send + 'static,
) -> MailTrailResult<usize> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let rw = db.rw_transaction().map_err(store_err)?;
        let doomed = delete(&rw)?;
        let removed = doomed.len();
        for item in doomed {
            rw.remove(item).map_err(store_err)?;
        }
        rw.commit().map_err(store_err)?;
        Ok(removed)
    })
    .await
    .map_err(store_err)?
}

pub async fn list_all_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
) -> MailTrailResult<Vec<T>> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r = db.r_transaction().map_err(store_err)?;
        let entities: Vec<T> = r
            .scan()
            .primary()
            .map_err(store_err)?
            .all()
            .map_err(store_err)?
            .try_collect()
            .map_err(store_err)?;
        Ok(entities)
    })
    .await
    .map_err(store_err)?
}

/// Primary keys start with the creation timestamp, so a primary scan yields
/// rows in insertion order and `desc` just walks the same index backwards.
/// Omitting `page`/`page_size` returns everything.
pub async fn paginate_query_primary_scan_all_impl<
    T: ToInput + Serialize + std::fmt::Debug + std::marker::Unpin + Send + Sync + 'static,
>(
    database: &Arc<Database<'static>>,
    page: Option<u64>,
    page_size: Option<u64>,
    desc: Option<bool>,
) -> MailTrailResult<Paginated<T>> {
    let db = database.clone();

    tokio::task::spawn_blocking(move || {
        let r = db.r_transaction().map_err(store_err)?;
        let total_items = r.len().primary::<T>().map_err(store_err)?;

        let (offset, total_pages) = match (page, page_size) {
            (Some(p), Some(s)) => {
                if p == 0 || s == 0 {
                    return Err(raise_error!(
                        "page and page_size are 1-based; 0 is not a valid value".into(),
                        ErrorCode::InvalidParameter
                    ));
                }
                let total_pages = if total_items > 0 {
                    total_items.div_ceil(s)
                } else {
                    0
                };
                (Some((p - 1) * s), Some(total_pages))
            }
            _ => (None, None),
        };

        // A page past the end is a valid, empty page.
        if offset.is_some_and(|offset| offset >= total_items) {
            return Ok(Paginated::new(
                page,
                page_size,
                total_items,
                total_pages,
                vec![],
            ));
        }

        let scan = r.scan().primary().map_err(store_err)?;
        let iter = scan.all().map_err(store_err)?;

        let skip = offset.unwrap_or(0) as usize;
        let take = page_size.unwrap_or(total_items) as usize;
        let items: Vec<T> = if desc.unwrap_or(false) {
            iter.rev()
                .skip(skip)
                .take(take)
                .try_collect()
                .map_err(store_err)?
        } else {
            iter.skip(skip)
                .take(take)
                .try_collect()
                .map_err(store_err)?
        };

        Ok(Paginated::new(
            page,
            page_size,
            total_items,
            total_pages,
            items,
        ))
    })
    .await
    .map_err(store_err)?
}

/// Secondary-index range scan. `start_with` on a fixed-width key (u64 ids)
/// is an exact match; on String keys it is a prefix match.
pub async fn filter_by_secondary_key_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    key_def: impl ToKeyDefinition<KeyOptions> + Send + 'static,
    start_with: impl ToKey + Send + 'static,
) -> MailTrailResult<Vec<T>> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r = db.r_transaction().map_err(store_err)?;
        let entities: Vec<T> = r
            .scan()
            .secondary(key_def)
            .map_err(store_err)?
            .start_with(start_with)
            .map_err(store_err)?
            .try_collect()
            .map_err(store_err)?;
        Ok(entities)
    })
    .await
    .map_err(store_err)?
}

pub async fn secondary_find_impl<T: ToInput + Clone + Send + 'static>(
    database: &Arc<Database<'static>>,
    key_def: impl ToKeyDefinition<KeyOptions> + Send + 'static,
    key: impl ToKey + Send + 'static,
) -> MailTrailResult<Option<T>> {
    let db = database.clone();
    tokio::task::spawn_blocking(move || {
        let r = db.r_transaction().map_err(store_err)?;
        let entity: Option<T> = r.get().secondary(key_def, key).map_err(store_err)?;
        Ok(entity)
    })
    .await
    .map_err(store_err)?
}

/// One page of a primary scan plus enough bookkeeping to render a pager.
#[derive(Debug)]
pub struct Paginated<T> {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub total_items: u64,
    pub total_pages: Option<u64>,
    pub items: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(
        page: Option<u64>,
        page_size: Option<u64>,
        total_items: u64,
        total_pages: Option<u64>,
        items: Vec<T>,
    ) -> Self {
        Paginated {
            page,
            page_size,
            total_items,
            total_pages,
            items,
        }
    }
}
