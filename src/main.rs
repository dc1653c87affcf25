use mimalloc::MiMalloc;
use modules::{
    context::{Initialize, ServiceContext},
    error::MailTrailResult,
    logger,
    rest::start_http_server,
    tasks::PeriodicTasks,
};
use tracing::info;

use crate::modules::{
    common::signal::SignalManager, database::manager::DatabaseManager, metrics::MetricsService,
    settings::dir::DataDirManager,
};

mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static LOGO: &str = r#"
  __  __       _ _ _____           _ _
 |  \/  | __ _(_) |_   _| __ __ _ (_) |
 | |\/| |/ _` | | | | | | '__/ _` || | |
 | |  | | (_| | | | | | | | | (_| || | |
 |_|  |_|\__,_|_|_| |_| |_|  \__,_||_|_|

"#;

#[tokio::main]
async fn main() -> MailTrailResult<()> {
    logger::initialize_logging();
    info!("{}", LOGO);
    info!("Starting mailtrail-server");
    info!("Version:  {}", mailtrail_version!());
    info!("Git:      [{}]", env!("GIT_HASH"));

    if let Err(error) = initialize().await {
        eprintln!("{:?}", error);
        return Err(error);
    }

    start_http_server().await
}

/// Wires up the managers in dependency order, then launches the periodic
/// reconciliation tasks. The HTTP server only starts once all of this holds.
async fn initialize() -> MailTrailResult<()> {
    SignalManager::initialize().await?;
    DataDirManager::initialize().await?;
    MetricsService::initialize().await?;
    DatabaseManager::initialize().await?;
    ServiceContext::initialize().await?;
    PeriodicTasks::start_background_tasks();
    Ok(())
}
