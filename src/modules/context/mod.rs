// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::MailTrailResult;
use crate::utc_now;
use std::sync::LazyLock;

pub mod status;

pub trait Initialize {
    async fn initialize() -> MailTrailResult<()>;
}

pub trait MailTrailTask {
    fn start();
}

pub static MAILTRAIL_CONTEXT: LazyLock<ServiceContext> = LazyLock::new(ServiceContext::new);

pub struct ServiceContext {
    start_at: i64,
}

impl Initialize for ServiceContext {
    async fn initialize() -> MailTrailResult<()> {
        // Touch the LazyLock so uptime is measured from process start, not first request.
        let _ = MAILTRAIL_CONTEXT.uptime_ms();
        Ok(())
    }
}

impl ServiceContext {
    pub fn new() -> Self {
        Self {
            start_at: utc_now!(),
        }
    }

    pub fn uptime_ms(&self) -> i64 {
        utc_now!() - self.start_at
    }
}
