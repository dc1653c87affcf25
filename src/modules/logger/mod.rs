use crate::modules::logger::file::setup_file_logger;
use crate::modules::settings::cli::SETTINGS;
use chrono::Local;
use std::process;
use tracing::Level;
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

mod file;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Human-readable stdout logging by default; daily-rolled JSON files when
/// `--mailtrail-log-to-file` is set.
pub fn initialize_logging() {
    if SETTINGS.mailtrail_log_to_file {
        setup_file_logger().unwrap();
    } else {
        setup_stdout_logger().unwrap();
    }
}

fn setup_stdout_logger() -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&SETTINGS.mailtrail_log_level))
        .with_ansi(SETTINGS.mailtrail_ansi_logs)
        .with_level(true)
        .with_target(true)
        .with_timer(LocalTimer)
        .with_writer(std::io::stdout)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

/// A bad log level is a startup mistake, not a runtime condition; bail
/// before any subscriber is installed.
fn parse_log_level(value: &str) -> Level {
    value.parse::<Level>().unwrap_or_else(|_| {
        eprintln!("'{value}' is not a log level; use one of: error, warn, info, debug, trace");
        process::exit(1);
    })
}
