// Data models for keyboard config persistence
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// USB vendor/product pair identifying a keyboard model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vid: u16,
    pub pid: u16,
}

impl DeviceIdentity {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// The live config row of one keyboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigRow<C = serde_json::Value> {
    pub device: DeviceIdentity,
    pub config: C,
    pub selected_profile_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A saved, named configuration for one keyboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile<C = serde_json::Value> {
    pub id: String,
    pub name: String,
    pub keyboard_id: DeviceIdentity,
    pub config: C,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What callers hand to `save_profile`; timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDraft<C = serde_json::Value> {
    pub id: String,
    pub name: String,
    pub keyboard_id: DeviceIdentity,
    pub config: C,
}

impl<C> ProfileDraft<C> {
    /// New profile with a freshly generated id
    pub fn new(name: impl Into<String>, keyboard_id: DeviceIdentity, config: C) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, keyboard_id, config)
    }

    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        keyboard_id: DeviceIdentity,
        config: C,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            keyboard_id,
            config,
        }
    }
}

impl<C> From<Profile<C>> for ProfileDraft<C> {
    fn from(profile: Profile<C>) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            keyboard_id: profile.keyboard_id,
            config: profile.config,
        }
    }
}
