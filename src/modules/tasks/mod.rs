// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::bounce::task::BounceScanTask;
use crate::modules::context::MailTrailTask;
use crate::modules::reply::task::ReplyScanTask;

pub struct PeriodicTasks;

impl PeriodicTasks {
    pub fn start_background_tasks() {
        BounceScanTask::start();
        ReplyScanTask::start();
    }
}
