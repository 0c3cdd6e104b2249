// RK Configurator - keyboard configuration persistence
// Module declarations

pub mod state;

pub use state::{
    Clock, Database, DbError, DbLocation, DbResult, DeviceConfigRow, DeviceConfigStore,
    DeviceIdentity, Profile, ProfileDraft, ProfileStore, SelectionManager, StoreConfig,
    SystemClock,
};

/// The three store components sharing one database handle
#[derive(Clone)]
pub struct ConfigStore {
    db: Database,
    pub configs: DeviceConfigStore,
    pub profiles: ProfileStore,
    pub selection: SelectionManager,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self {
            configs: DeviceConfigStore::new(db.clone()),
            profiles: ProfileStore::new(db.clone()),
            selection: SelectionManager::new(db.clone()),
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Close the shared handle; safe to call more than once
    pub async fn close(&self) -> DbResult<()> {
        self.db.close().await
    }
}

/// Open the database described by `config` and build the stores on top of it
pub async fn init_store(config: StoreConfig) -> DbResult<ConfigStore> {
    let db = Database::open(config).await.map_err(|e| {
        log::error!("Failed to initialize database: {}", e);
        e
    })?;

    log::info!("RK configurator store initialized");
    Ok(ConfigStore::new(db))
}
