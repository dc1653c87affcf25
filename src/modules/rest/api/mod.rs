// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use email::EmailApi;
use poem_openapi::{OpenApiService, Tags};
use reconcile::ReconcileApi;
use send::SendMailApi;

use crate::mailtrail_version;

pub mod email;
pub mod reconcile;
pub mod send;

#[derive(Tags)]
pub enum ApiTags {
    SendMail,
    Email,
    Reconciliation,
}

type MailTrailOpenApi = (SendMailApi, EmailApi, ReconcileApi);

pub fn create_openapi_service() -> OpenApiService<MailTrailOpenApi, ()> {
    OpenApiService::new(
        (SendMailApi, EmailApi, ReconcileApi),
        "MailTrailApi",
        mailtrail_version!(),
    )
}
