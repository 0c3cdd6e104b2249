// Named, per-keyboard configuration profiles
use rusqlite::TransactionBehavior;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::db::{Database, DbResult};
use super::models::{DeviceIdentity, Profile, ProfileDraft};
use super::queries;

/// CRUD over saved profiles.
///
/// There is a single `save_profile` entry point for both create and update:
/// the profile id decides which one happens, and `created_at` survives
/// every later save under that id.
#[derive(Clone)]
pub struct ProfileStore {
    db: Database,
}

impl ProfileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Profiles of `device`, most recently updated first
    pub async fn list_profiles<C: DeserializeOwned>(
        &self,
        device: DeviceIdentity,
    ) -> DbResult<Vec<Profile<C>>> {
        let conn = self.db.lock().await?;
        queries::select_profiles_for_device(&conn, &device)
    }

    pub async fn get_profile<C: DeserializeOwned>(&self, id: &str) -> DbResult<Option<Profile<C>>> {
        let conn = self.db.lock().await?;
        queries::select_profile(&conn, id)
    }

    /// Insert or update by id and return the stored profile
    pub async fn save_profile<C: Serialize>(&self, draft: ProfileDraft<C>) -> DbResult<Profile<C>> {
        let config_json = queries::encode_config(&draft.config)?;

        let mut conn = self.db.lock().await?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = self.db.now();
        let existing = queries::select_profile_created_at(&tx, &draft.id)?;
        let created_at = existing.unwrap_or(now);

        queries::upsert_profile(
            &tx,
            &draft.id,
            &draft.name,
            &draft.keyboard_id,
            &config_json,
            created_at,
            now,
        )?;
        tx.commit()?;

        log::debug!(
            "{} profile {} ({:?}) for keyboard {}",
            if existing.is_some() { "Updated" } else { "Created" },
            draft.id,
            draft.name,
            draft.keyboard_id
        );

        Ok(Profile {
            id: draft.id,
            name: draft.name,
            keyboard_id: draft.keyboard_id,
            config: draft.config,
            created_at,
            updated_at: now,
        })
    }

    /// Delete by id. Unknown ids are not an error.
    ///
    /// A keyboard whose selection points at the deleted profile keeps that
    /// selection; callers detect it through a failed `get_profile`.
    pub async fn delete_profile(&self, id: &str) -> DbResult<()> {
        let conn = self.db.lock().await?;
        let removed = queries::delete_profile(&conn, id)?;
        log::debug!("Deleted profile {} ({} row(s))", id, removed);
        Ok(())
    }
}
