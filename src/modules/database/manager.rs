use crate::modules::context::Initialize;
use crate::modules::database::META_MODELS;
use crate::modules::error::{code::ErrorCode, MailTrailError, MailTrailResult};
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use crate::raise_error;
use native_db::{Builder, Database};
use std::sync::{Arc, LazyLock};
use tracing::info;

const DEFAULT_CACHE_BYTES: usize = 128 * 1024 * 1024;
const MIN_CACHE_BYTES: usize = 64 * 1024 * 1024;

pub static DB_MANAGER: LazyLock<DatabaseManager> = LazyLock::new(DatabaseManager::new);

pub struct DatabaseManager {
    /// The one store behind everything: emails, bounce checks, replies,
    /// contacts and notifications all live in this database.
    meta_db: Arc<Database<'static>>,
}

impl DatabaseManager {
    fn new() -> Self {
        let meta_db = Self::open_meta_database().expect("Failed to open metadata database");
        DatabaseManager { meta_db }
    }

    pub fn meta_db(&self) -> &Arc<Database<'static>> {
        &self.meta_db
    }

    /// In-memory when the memory-mode flag is set (tests, evaluation), a
    /// compacted redb file under the data directory otherwise.
    fn open_meta_database() -> MailTrailResult<Arc<Database<'static>>> {
        if SETTINGS.mailtrail_metadata_memory_mode_enabled {
            return Ok(Arc::new(
                Builder::new().create_in_memory(&META_MODELS).unwrap(),
            ));
        }
        let cache_bytes = SETTINGS
            .mailtrail_metadata_cache_size
            .unwrap_or(DEFAULT_CACHE_BYTES)
            .max(MIN_CACHE_BYTES);
        let mut database = Builder::new()
            .set_cache_size(cache_bytes)
            .create(&META_MODELS, DATA_DIR_MANAGER.meta_db.clone())
            .map_err(Self::describe_open_error)?;
        database
            .compact()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(Arc::new(database))
    }

    fn describe_open_error(error: native_db::db_type::Error) -> MailTrailError {
        if let native_db::db_type::Error::RedbDatabaseError(redb::DatabaseError::DatabaseAlreadyOpen) =
            error
        {
            return raise_error!(
                "Metadata database file is locked by another running instance".into(),
                ErrorCode::InternalError
            );
        }
        raise_error!(
            format!("Failed to open metadata database: {:?}", error),
            ErrorCode::InternalError
        )
    }
}

impl Initialize for DatabaseManager {
    async fn initialize() -> MailTrailResult<()> {
        if SETTINGS.mailtrail_metadata_memory_mode_enabled {
            info!("Metadata database running in memory mode, records are not persisted");
        } else {
            info!(
                "Metadata database ready at: {:?}",
                &DATA_DIR_MANAGER.meta_db
            );
        }
        let _ = DB_MANAGER.meta_db();
        Ok(())
    }
}
