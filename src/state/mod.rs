// State management module
// SQLite persistence for keyboard configs, profiles and profile selection

pub mod clock;
pub mod db;
pub mod device_config;
pub mod models;
pub mod profiles;
pub mod queries;
pub mod selection;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use db::{Database, DbError, DbLocation, DbResult, StoreConfig};
pub use device_config::DeviceConfigStore;
pub use models::{DeviceConfigRow, DeviceIdentity, Profile, ProfileDraft};
pub use profiles::ProfileStore;
pub use selection::SelectionManager;
pub use storage::StorageError;
