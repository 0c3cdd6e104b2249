// Active profile per keyboard
use rusqlite::TransactionBehavior;

use super::db::{Database, DbResult};
use super::models::DeviceIdentity;
use super::queries;

/// Config stored for a keyboard whose first write is a selection
pub const EMPTY_CONFIG_JSON: &str = "{}";

/// Tracks which profile is active on each keyboard.
///
/// The selection lives on the keyboard's config row but is written on its
/// own: changing it leaves the config and its `updated_at` alone. Profile
/// existence is not checked.
#[derive(Clone)]
pub struct SelectionManager {
    db: Database,
}

impl SelectionManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Select `profile_id` for `device`, or clear the selection with `None`.
    /// Creates the keyboard row with an empty config if it does not exist.
    pub async fn set_selected_profile(
        &self,
        device: DeviceIdentity,
        profile_id: Option<&str>,
    ) -> DbResult<()> {
        let selected = profile_id.filter(|id| !id.is_empty());

        let mut conn = self.db.lock().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if queries::update_selected_profile_id(&tx, &device, selected)? == 0 {
            queries::upsert_keyboard_config(
                &tx,
                &device,
                EMPTY_CONFIG_JSON,
                selected,
                self.db.now(),
            )?;
            log::debug!("Created config row for keyboard {} to hold selection", device);
        }
        tx.commit()?;

        log::debug!("Selected profile {:?} for keyboard {}", selected, device);
        Ok(())
    }

    /// `None` when nothing is selected or the keyboard has no row yet
    pub async fn get_selected_profile(&self, device: DeviceIdentity) -> DbResult<Option<String>> {
        let conn = self.db.lock().await?;
        Ok(queries::select_selected_profile_id(&conn, &device)?.flatten())
    }
}
