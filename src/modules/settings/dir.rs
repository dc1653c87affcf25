use crate::modules::context::Initialize;
use crate::modules::error::{code::ErrorCode, MailTrailResult};
use crate::modules::settings::cli::SETTINGS;
use crate::raise_error;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const META_FILE: &str = "meta.db";
const LOG_DIR: &str = "logs";

pub static DATA_DIR_MANAGER: LazyLock<DataDirManager> =
    LazyLock::new(|| DataDirManager::new(PathBuf::from(&SETTINGS.mailtrail_root_dir)));

/// Everything MailTrail persists sits under one root: the redb file beside
/// a logs/ subdirectory.
#[derive(Debug)]
pub struct DataDirManager {
    pub root_dir: PathBuf,
    pub meta_db: PathBuf,
    pub log_dir: PathBuf,
}

impl Initialize for DataDirManager {
    async fn initialize() -> MailTrailResult<()> {
        for dir in [&DATA_DIR_MANAGER.root_dir, &DATA_DIR_MANAGER.log_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        }
        Ok(())
    }
}

impl DataDirManager {
    pub fn new(root_dir: PathBuf) -> Self {
        let meta_db = root_dir.join(META_FILE);
        let log_dir = root_dir.join(LOG_DIR);
        Self {
            root_dir,
            meta_db,
            log_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_derive_from_root() {
        let temp_dir = tempdir().unwrap();
        let manager = DataDirManager::new(temp_dir.path().to_path_buf());

        assert_eq!(manager.meta_db, temp_dir.path().join("meta.db"));
        assert_eq!(manager.log_dir, temp_dir.path().join("logs"));
        assert_eq!(manager.root_dir, temp_dir.path());
    }
}
