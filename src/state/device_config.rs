// Live per-keyboard configuration
use rusqlite::TransactionBehavior;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::db::{Database, DbResult};
use super::models::{DeviceConfigRow, DeviceIdentity};
use super::queries;

/// One config row per keyboard. Saving a config never changes which
/// profile is selected for that keyboard.
#[derive(Clone)]
pub struct DeviceConfigStore {
    db: Database,
}

impl DeviceConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert the keyboard's config, carrying the current selection forward
    pub async fn save_config<C: Serialize + ?Sized>(
        &self,
        device: DeviceIdentity,
        config: &C,
    ) -> DbResult<()> {
        let config_json = queries::encode_config(config)?;

        let mut conn = self.db.lock().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let selected = queries::select_selected_profile_id(&tx, &device)?.flatten();
        queries::upsert_keyboard_config(
            &tx,
            &device,
            &config_json,
            selected.as_deref(),
            self.db.now(),
        )?;
        tx.commit()?;

        log::debug!(
            "Saved config for keyboard {} (selected profile: {:?})",
            device,
            selected
        );
        Ok(())
    }

    /// Stored config, or `None` if nothing was ever saved for this keyboard
    pub async fn load_config<C: DeserializeOwned>(
        &self,
        device: DeviceIdentity,
    ) -> DbResult<Option<C>> {
        let conn = self.db.lock().await?;
        match queries::select_config_json(&conn, &device)? {
            Some(config_json) => {
                queries::decode_config(&config_json, &queries::config_location(&device)).map(Some)
            }
            None => Ok(None),
        }
    }

    pub async fn load_row<C: DeserializeOwned>(
        &self,
        device: DeviceIdentity,
    ) -> DbResult<Option<DeviceConfigRow<C>>> {
        let conn = self.db.lock().await?;
        queries::select_keyboard_config_row(&conn, &device)
    }

    /// Keyboards with a stored row, most recently written first
    pub async fn list_devices(&self) -> DbResult<Vec<DeviceIdentity>> {
        let conn = self.db.lock().await?;
        queries::select_devices(&conn)
    }
}
