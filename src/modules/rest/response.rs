use poem_openapi::Object;
use serde::{Deserialize, Serialize};

use crate::modules::database::Paginated;

/// JSON envelope for the list endpoints: one page of rows plus the paging
/// bookkeeping. `page` and `total_pages` stay unset when the caller asked
/// for the unpaged listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Object)]
pub struct DataPage<S>
where
    S: Serialize
        + std::fmt::Debug
        + std::marker::Unpin
        + Send
        + Sync
        + poem_openapi::types::Type
        + poem_openapi::types::ParseFromJSON
        + poem_openapi::types::ToJSON,
{
    /// 1-based page number this slice came from.
    pub page: Option<u64>,
    /// Rows per page as requested.
    pub page_size: Option<u64>,
    /// Row count across the whole table, not just this page.
    pub total_items: u64,
    /// Total number of pages at this page size.
    pub total_pages: Option<u64>,
    /// Rows of the current page.
    pub items: Vec<S>,
}

impl<S> From<Paginated<S>> for DataPage<S>
where
    S: Serialize
        + std::fmt::Debug
        + std::marker::Unpin
        + Send
        + Sync
        + poem_openapi::types::Type
        + poem_openapi::types::ParseFromJSON
        + poem_openapi::types::ToJSON,
{
    fn from(paginated: Paginated<S>) -> Self {
        DataPage {
            page: paginated.page,
            page_size: paginated.page_size,
            total_items: paginated.total_items,
            total_pages: paginated.total_pages,
            items: paginated.items,
        }
    }
}
