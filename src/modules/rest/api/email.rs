// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::bounce::service::apply_bounce;
use crate::modules::email::entity::{BounceType, OutboundEmail};
use crate::modules::error::code::ErrorCode;
use crate::modules::metrics::MAILTRAIL_BOUNCES_DETECTED_TOTAL;
use crate::modules::reply::entity::EmailReply;
use crate::modules::rest::api::ApiTags;
use crate::modules::rest::response::DataPage;
use crate::modules::rest::ApiResult;
use crate::raise_error;

use poem::web::Path;
use poem_openapi::param::Query;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use serde::{Deserialize, Serialize};

/// Body of the manual bounce-mark endpoint. Both fields are optional; an
/// omitted type is classified from the reason text.
#[derive(Debug, Clone, Serialize, Deserialize, Object)]
pub struct MarkBouncedRequest {
    /// Hard (permanent) or Soft (transient).
    pub bounce_type: Option<BounceType>,
    /// Free-form reason recorded on the email, e.g. from a support ticket.
    #[oai(validator(max_length = 500))]
    pub reason: Option<String>,
}

pub struct EmailApi;

#[OpenApi(prefix_path = "/api/v1", tag = "ApiTags::Email")]
impl EmailApi {
    /// Retrieves a tracked email with its full lifecycle state.
    #[oai(path = "/emails/:id", method = "get", operation_id = "get_email")]
    async fn get_email(
        &self,
        /// The id of the tracked email
        id: Path<u64>,
    ) -> ApiResult<Json<OutboundEmail>> {
        let email = OutboundEmail::get(id.0).await?.ok_or_else(|| {
            raise_error!(
                format!("The email with id={} was not found.", id.0),
                ErrorCode::ResourceNotFound
            )
        })?;
        Ok(Json(email))
    }

    /// Lists tracked emails in creation order with pagination.
    #[oai(path = "/emails", method = "get", operation_id = "list_emails")]
    async fn list_emails(
        &self,
        /// 1-based page to return; omit together with page_size for the full list.
        page: Query<Option<u64>>,
        /// Rows per page.
        page_size: Query<Option<u64>>,
        /// Newest first when true.
        desc: Query<Option<bool>>,
    ) -> ApiResult<Json<DataPage<OutboundEmail>>> {
        let paginated = OutboundEmail::paginate_list(page.0, page_size.0, desc.0).await?;
        Ok(Json(paginated.into()))
    }

    /// Manually marks a tracked email as bounced.
    ///
    /// Applies the same sticky transition the reconciliation service uses, so
    /// repeating the call on an already-bounced email changes nothing.
    #[oai(
        path = "/emails/:id/mark-bounced",
        method = "post",
        operation_id = "mark_email_bounced"
    )]
    async fn mark_email_bounced(
        &self,
        /// The id of the tracked email
        id: Path<u64>,
        /// Optional bounce type and reason
        request: Json<MarkBouncedRequest>,
    ) -> ApiResult<Json<OutboundEmail>> {
        let transitioned = apply_bounce(id.0, request.0.bounce_type, request.0.reason).await?;
        if transitioned {
            MAILTRAIL_BOUNCES_DETECTED_TOTAL
                .with_label_values(&["manual"])
                .inc();
        }
        let email = OutboundEmail::get(id.0).await?.ok_or_else(|| {
            raise_error!(
                format!("The email with id={} was not found.", id.0),
                ErrorCode::ResourceNotFound
            )
        })?;
        Ok(Json(email))
    }

    /// Lists the detected replies for a tracked email, oldest first.
    #[oai(
        path = "/emails/:id/replies",
        method = "get",
        operation_id = "list_email_replies"
    )]
    async fn list_email_replies(
        &self,
        /// The id of the tracked email
        id: Path<u64>,
    ) -> ApiResult<Json<Vec<EmailReply>>> {
        OutboundEmail::get(id.0).await?.ok_or_else(|| {
            raise_error!(
                format!("The email with id={} was not found.", id.0),
                ErrorCode::ResourceNotFound
            )
        })?;
        let mut replies = EmailReply::list_for_email(id.0).await?;
        replies.sort_by_key(|reply| reply.received_at);
        Ok(Json(replies))
    }
}
