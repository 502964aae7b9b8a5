use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Sliding-window bucket width in milliseconds.
pub const BUCKET_WIDTH_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key: String,
    pub name: String,
    pub created_iso: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_iso: Option<String>,
    #[serde(default)]
    pub requests: u64,
    pub rate_limit: RateLimitPolicy,
    /// Bucket start (ms, floored to 10 s) to request count.
    #[serde(default)]
    pub usage_buckets: BTreeMap<u64, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 60,
            window_ms: 60_000,
        }
    }
}

pub fn bucket_for(now_ms: u64) -> u64 {
    now_ms / BUCKET_WIDTH_MS * BUCKET_WIDTH_MS
}
