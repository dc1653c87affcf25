// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::bounce::service::BounceReconciler;
use crate::modules::context::MailTrailTask;
use crate::modules::scheduler::periodic::PeriodicTask;
use crate::modules::settings::cli::SETTINGS;
use std::time::Duration;
use tracing::{debug, info};

/// Periodically consumes due bounce checks and sweeps recent sends for NDRs.
pub struct BounceScanTask;

impl MailTrailTask for BounceScanTask {
    fn start() {
        let periodic_task = PeriodicTask::new("bounce-scan-task");
        let interval = Duration::from_secs(SETTINGS.mailtrail_bounce_scan_interval_secs);

        let task = move || async move {
            debug!("Starting bounce reconciliation pass");
            let summary = BounceReconciler::run().await?;
            if summary.pending_matched > 0 || summary.swept_matched > 0 {
                info!(
                    pending_matched = summary.pending_matched,
                    swept_matched = summary.swept_matched,
                    "Bounce scan detected bounced emails"
                );
            }
            Ok(())
        };

        periodic_task.start(task, interval);
    }
}
