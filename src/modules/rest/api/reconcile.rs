// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::bounce::service::{BounceReconciler, BounceRunSummary};
use crate::modules::reply::service::{ReplyReconciler, ReplyRunSummary};
use crate::modules::rest::api::ApiTags;
use crate::modules::rest::ApiResult;

use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

pub struct ReconcileApi;

#[OpenApi(prefix_path = "/api/v1", tag = "ApiTags::Reconciliation")]
impl ReconcileApi {
    /// Runs one bounce reconciliation round on demand.
    ///
    /// The same engine the periodic scan uses: the pending-check pass plus
    /// the general sweep. A run that matches nothing still returns 200 with a
    /// zero-count summary; a failed provider token exchange fails the call.
    #[oai(
        path = "/reconcile/bounces",
        method = "post",
        operation_id = "reconcile_bounces"
    )]
    async fn reconcile_bounces(&self) -> ApiResult<Json<BounceRunSummary>> {
        Ok(Json(BounceReconciler::run().await?))
    }

    /// Runs one reply reconciliation round on demand.
    #[oai(
        path = "/reconcile/replies",
        method = "post",
        operation_id = "reconcile_replies"
    )]
    async fn reconcile_replies(&self) -> ApiResult<Json<ReplyRunSummary>> {
        Ok(Json(ReplyReconciler::run().await?))
    }
}
