//! Request and response DTOs for the public HTTP surface.

use serde::{Deserialize, Serialize};

/// Header carrying the tenant id on KV requests.
pub const TENANT_HEADER: &str = "X-User-Id";

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub ttl_seconds: i64,
}

#[derive(Debug, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValueResponse {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
