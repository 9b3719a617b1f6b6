//! On-disk snapshot format for a single tenant.
//!
//! A snapshot is UTF-8 JSON `{ user_id, items: [...] }` where each item
//! carries its key, base64-encoded value bytes, and an RFC3339 expiry.
//! "Never expires" is written as the zero instant (the Unix epoch) so the
//! field is always present. Files live under the configured data directory
//! as `user_<tenant>.json`.

use super::store::Item;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_PREFIX: &str = "user_";
pub const SNAPSHOT_SUFFIX: &str = ".json";

/// One key/value/expiry entry in a snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedItem {
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// Serializable contents of one tenant's store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSnapshot {
    pub user_id: String,
    pub items: Vec<PersistedItem>,
}

impl PersistedItem {
    pub fn from_item(key: String, item: &Item) -> Self {
        Self {
            key,
            value: item.value.clone(),
            expires_at: expiry_to_wire(item.expires_at),
        }
    }

    /// Converts back to a store item. Snapshots carry no write stamps, so a
    /// restored item gets timestamp 0 and loses to any concurrent live write.
    pub fn into_item(self) -> (String, Item) {
        (
            self.key,
            Item {
                value: self.value,
                expires_at: expiry_from_wire(self.expires_at),
                timestamp: 0,
            },
        )
    }
}

fn expiry_to_wire(expires_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    expires_at.unwrap_or(DateTime::UNIX_EPOCH)
}

fn expiry_from_wire(expires_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if expires_at == DateTime::UNIX_EPOCH {
        None
    } else {
        Some(expires_at)
    }
}

pub fn snapshot_path(dir: &Path, tenant: &str) -> PathBuf {
    dir.join(format!("{}{}{}", SNAPSHOT_PREFIX, tenant, SNAPSHOT_SUFFIX))
}

pub fn is_snapshot_file(filename: &str) -> bool {
    filename.starts_with(SNAPSHOT_PREFIX)
        && filename.ends_with(SNAPSHOT_SUFFIX)
        && filename.len() > SNAPSHOT_PREFIX.len() + SNAPSHOT_SUFFIX.len()
}

/// Extracts the tenant id from a `user_<tenant>.json` filename.
pub fn tenant_from_filename(filename: &str) -> Option<&str> {
    if !is_snapshot_file(filename) {
        return None;
    }
    filename
        .strip_prefix(SNAPSHOT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SNAPSHOT_SUFFIX))
}

/// Serde adapter encoding byte values as base64 strings in JSON, matching
/// what replicated peers put on the wire.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
