// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod entity;
pub mod ndr;
pub mod service;
pub mod subject;
pub mod task;
