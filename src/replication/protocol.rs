//! Wire contract for pushing writes to successor nodes.

use crate::cache::snapshot::base64_bytes;
use serde::{Deserialize, Serialize};

/// Internal endpoint a primary POSTs replicated writes to.
pub const ENDPOINT_REPLICATE: &str = "/v1/internal/replicate";

/// Payload for one replicated write. The receiving node auto-creates the
/// tenant and applies the set with the carried timestamp, so both sides
/// resolve conflicts identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatePayload {
    pub user_id: String,
    pub key: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub ttl_secs: i64,
    pub timestamp: i64,
}
