// Row-level SQL for keyboard configs and profiles.
// Callers pass either a plain connection or an open transaction.
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::db::{DbError, DbResult};
use super::models::{DeviceConfigRow, DeviceIdentity, Profile};

// ==================== ENCODING ====================

pub fn encode_config<C: Serialize + ?Sized>(config: &C) -> DbResult<String> {
    serde_json::to_string(config).map_err(DbError::Serialize)
}

pub fn decode_config<C: DeserializeOwned>(config_json: &str, location: &str) -> DbResult<C> {
    serde_json::from_str(config_json).map_err(|e| {
        log::warn!("Unreadable config_json in {}: {}", location, e);
        DbError::corrupt(location, e)
    })
}

fn decode_timestamp(secs: i64, location: &str) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| DbError::corrupt(location, format!("timestamp out of range: {}", secs)))
}

fn decode_device(vid: i64, pid: i64, location: &str) -> DbResult<DeviceIdentity> {
    match (u16::try_from(vid), u16::try_from(pid)) {
        (Ok(vid), Ok(pid)) => Ok(DeviceIdentity { vid, pid }),
        _ => Err(DbError::corrupt(
            location,
            format!("device id out of range: {}:{}", vid, pid),
        )),
    }
}

/// Empty strings count as "no selection"
fn normalize_selection(selected: Option<String>) -> Option<String> {
    selected.filter(|id| !id.is_empty())
}

pub(crate) fn config_location(device: &DeviceIdentity) -> String {
    format!("keyboard_configs[{}]", device)
}

fn profile_location(id: &str) -> String {
    format!("profiles[{}]", id)
}

// ==================== KEYBOARD CONFIG QUERIES ====================

/// Selection of an existing row. `None` means there is no row at all.
pub fn select_selected_profile_id(
    conn: &Connection,
    device: &DeviceIdentity,
) -> DbResult<Option<Option<String>>> {
    let selected = conn
        .query_row(
            "SELECT selected_profile_id FROM keyboard_configs
             WHERE keyboard_vid = ?1 AND keyboard_pid = ?2",
            params![device.vid, device.pid],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;

    Ok(selected.map(normalize_selection))
}

/// Insert or replace the whole row
pub fn upsert_keyboard_config(
    conn: &Connection,
    device: &DeviceIdentity,
    config_json: &str,
    selected_profile_id: Option<&str>,
    updated_at: DateTime<Utc>,
) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO keyboard_configs
            (keyboard_vid, keyboard_pid, config_json, selected_profile_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            device.vid,
            device.pid,
            config_json,
            selected_profile_id,
            updated_at.timestamp(),
        ],
    )?;
    Ok(())
}

/// Set only the selection column. Returns the number of rows touched.
pub fn update_selected_profile_id(
    conn: &Connection,
    device: &DeviceIdentity,
    selected_profile_id: Option<&str>,
) -> DbResult<usize> {
    let changed = conn.execute(
        "UPDATE keyboard_configs SET selected_profile_id = ?1
         WHERE keyboard_vid = ?2 AND keyboard_pid = ?3",
        params![selected_profile_id, device.vid, device.pid],
    )?;
    Ok(changed)
}

pub fn select_config_json(conn: &Connection, device: &DeviceIdentity) -> DbResult<Option<String>> {
    let config_json = conn
        .query_row(
            "SELECT config_json FROM keyboard_configs
             WHERE keyboard_vid = ?1 AND keyboard_pid = ?2",
            params![device.vid, device.pid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(config_json)
}

pub fn select_keyboard_config_row<C: DeserializeOwned>(
    conn: &Connection,
    device: &DeviceIdentity,
) -> DbResult<Option<DeviceConfigRow<C>>> {
    let raw = conn
        .query_row(
            "SELECT config_json, selected_profile_id, updated_at FROM keyboard_configs
             WHERE keyboard_vid = ?1 AND keyboard_pid = ?2",
            params![device.vid, device.pid],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((config_json, selected_profile_id, updated_at)) = raw else {
        return Ok(None);
    };

    let location = config_location(device);
    Ok(Some(DeviceConfigRow {
        device: *device,
        config: decode_config(&config_json, &location)?,
        selected_profile_id: normalize_selection(selected_profile_id),
        updated_at: decode_timestamp(updated_at, &location)?,
    }))
}

/// Every keyboard with a stored row, most recently written first
pub fn select_devices(conn: &Connection) -> DbResult<Vec<DeviceIdentity>> {
    let mut stmt = conn.prepare(
        "SELECT keyboard_vid, keyboard_pid FROM keyboard_configs
         ORDER BY updated_at DESC, rowid DESC",
    )?;

    let raw = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(vid, pid)| decode_device(vid, pid, "keyboard_configs"))
        .collect()
}

// ==================== PROFILE QUERIES ====================

struct ProfileRecord {
    id: String,
    name: String,
    keyboard_vid: i64,
    keyboard_pid: i64,
    config_json: String,
    created_at: i64,
    updated_at: i64,
}

impl ProfileRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            keyboard_vid: row.get(2)?,
            keyboard_pid: row.get(3)?,
            config_json: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn decode<C: DeserializeOwned>(self) -> DbResult<Profile<C>> {
        let location = profile_location(&self.id);
        Ok(Profile {
            keyboard_id: decode_device(self.keyboard_vid, self.keyboard_pid, &location)?,
            config: decode_config(&self.config_json, &location)?,
            created_at: decode_timestamp(self.created_at, &location)?,
            updated_at: decode_timestamp(self.updated_at, &location)?,
            id: self.id,
            name: self.name,
        })
    }
}

const PROFILE_COLUMNS: &str =
    "id, name, keyboard_vid, keyboard_pid, config_json, created_at, updated_at";

/// `created_at` of an existing profile
pub fn select_profile_created_at(conn: &Connection, id: &str) -> DbResult<Option<DateTime<Utc>>> {
    let created_at = conn
        .query_row(
            "SELECT created_at FROM profiles WHERE id = ?1",
            params![id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    created_at
        .map(|secs| decode_timestamp(secs, &profile_location(id)))
        .transpose()
}

pub fn upsert_profile(
    conn: &Connection,
    id: &str,
    name: &str,
    keyboard_id: &DeviceIdentity,
    config_json: &str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO profiles
            (id, name, keyboard_vid, keyboard_pid, config_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            name,
            keyboard_id.vid,
            keyboard_id.pid,
            config_json,
            created_at.timestamp(),
            updated_at.timestamp(),
        ],
    )?;
    Ok(())
}

pub fn select_profile<C: DeserializeOwned>(
    conn: &Connection,
    id: &str,
) -> DbResult<Option<Profile<C>>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS),
            params![id],
            ProfileRecord::from_row,
        )
        .optional()?;

    record.map(ProfileRecord::decode).transpose()
}

/// Profiles of one keyboard, most recently updated first. Equal
/// `updated_at` values fall back to write order (`INSERT OR REPLACE`
/// assigns a fresh rowid on every save).
pub fn select_profiles_for_device<C: DeserializeOwned>(
    conn: &Connection,
    device: &DeviceIdentity,
) -> DbResult<Vec<Profile<C>>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM profiles
         WHERE keyboard_vid = ?1 AND keyboard_pid = ?2
         ORDER BY updated_at DESC, rowid DESC",
        PROFILE_COLUMNS
    ))?;

    let records = stmt
        .query_map(params![device.vid, device.pid], ProfileRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    records.into_iter().map(ProfileRecord::decode).collect()
}

/// Returns the number of rows removed (0 or 1)
pub fn delete_profile(conn: &Connection, id: &str) -> DbResult<usize> {
    let removed = conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::db::ensure_schema;
    use serde_json::{json, Value};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_selection_distinguishes_missing_row_from_null() {
        let conn = setup();
        let device = DeviceIdentity::new(1, 2);

        assert_eq!(select_selected_profile_id(&conn, &device).unwrap(), None);

        upsert_keyboard_config(&conn, &device, "{}", None, at(10)).unwrap();
        assert_eq!(select_selected_profile_id(&conn, &device).unwrap(), Some(None));

        update_selected_profile_id(&conn, &device, Some("")).unwrap();
        assert_eq!(select_selected_profile_id(&conn, &device).unwrap(), Some(None));
    }

    #[test]
    fn test_update_selection_without_row_touches_nothing() {
        let conn = setup();
        let changed =
            update_selected_profile_id(&conn, &DeviceIdentity::new(1, 2), Some("p1")).unwrap();
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_malformed_config_is_corrupt_data() {
        let conn = setup();
        let device = DeviceIdentity::new(1, 2);
        upsert_keyboard_config(&conn, &device, "{not json", None, at(10)).unwrap();

        let err = select_keyboard_config_row::<Value>(&conn, &device).unwrap_err();
        match err {
            DbError::CorruptData { location, .. } => {
                assert_eq!(location, "keyboard_configs[0001:0002]")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_device_is_corrupt_data() {
        let conn = setup();
        conn.execute(
            "INSERT INTO profiles (id, name, keyboard_vid, keyboard_pid, config_json, created_at, updated_at)
             VALUES ('p1', 'x', 70000, 1, '{}', 0, 0)",
            [],
        )
        .unwrap();

        let err = select_profile::<Value>(&conn, "p1").unwrap_err();
        assert!(matches!(err, DbError::CorruptData { .. }));
    }

    #[test]
    fn test_profile_roundtrip_keeps_created_at() {
        let conn = setup();
        let device = DeviceIdentity::new(0x258a, 0x00c0);
        upsert_profile(&conn, "p1", "Work", &device, r#"{"brightness":3}"#, at(100), at(200))
            .unwrap();

        assert_eq!(select_profile_created_at(&conn, "p1").unwrap(), Some(at(100)));

        let profile = select_profile::<Value>(&conn, "p1").unwrap().unwrap();
        assert_eq!(profile.name, "Work");
        assert_eq!(profile.keyboard_id, device);
        assert_eq!(profile.config, json!({"brightness": 3}));
        assert_eq!(profile.created_at, at(100));
        assert_eq!(profile.updated_at, at(200));
    }

    #[test]
    fn test_equal_timestamps_list_latest_write_first() {
        let conn = setup();
        let device = DeviceIdentity::new(1, 2);
        upsert_profile(&conn, "a", "A", &device, "{}", at(5), at(5)).unwrap();
        upsert_profile(&conn, "b", "B", &device, "{}", at(5), at(5)).unwrap();
        upsert_profile(&conn, "a", "A", &device, "{}", at(5), at(5)).unwrap();

        let ids: Vec<String> = select_profiles_for_device::<Value>(&conn, &device)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
