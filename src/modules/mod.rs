// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod bounce;
pub mod common;
pub mod context;
pub mod crm;
pub mod database;
pub mod email;
pub mod error;
pub mod graph;
pub mod logger;
pub mod metrics;
pub mod reply;
pub mod rest;
pub mod scheduler;
pub mod settings;
pub mod tasks;
pub mod utils;
