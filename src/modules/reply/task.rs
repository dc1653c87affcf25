// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::context::MailTrailTask;
use crate::modules::reply::service::ReplyReconciler;
use crate::modules::scheduler::periodic::PeriodicTask;
use crate::modules::settings::cli::SETTINGS;
use std::time::Duration;
use tracing::{debug, info};

/// Periodically threads inbox messages back to tracked sends.
pub struct ReplyScanTask;

impl MailTrailTask for ReplyScanTask {
    fn start() {
        let periodic_task = PeriodicTask::new("reply-scan-task");
        let interval = Duration::from_secs(SETTINGS.mailtrail_reply_scan_interval_secs);

        let task = move || async move {
            debug!("Starting reply reconciliation pass");
            let summary = ReplyReconciler::run().await?;
            if summary.replies_recorded > 0 {
                info!(
                    replies_recorded = summary.replies_recorded,
                    "Reply scan recorded new replies"
                );
            }
            Ok(())
        };

        periodic_task.start(task, interval);
    }
}
