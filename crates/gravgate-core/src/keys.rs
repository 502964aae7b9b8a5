use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::warn;

use gravgate_common::GatewayError;
use gravgate_storage::JsonFile;
use gravgate_storage::entities::api_keys::{ApiKeyRecord, RateLimitPolicy, bucket_for};

const FLUSH_INTERVAL: Duration = Duration::from_secs(60);
const KEY_PREFIX: &str = "gg-";

#[derive(Debug, Clone, Default)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_in_s: Option<u64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KeyStats {
    pub keys: usize,
    pub total_requests: u64,
}

/// API-key store with a per-key sliding-window limiter. Hot-path mutations
/// (`validate`, `check_rate_limit`) stay in memory; the whole set flushes to
/// disk every 60 s and on admin mutations.
pub struct KeyStore {
    file: JsonFile<Vec<ApiKeyRecord>>,
    keys: Mutex<HashMap<String, ApiKeyRecord>>,
}

impl KeyStore {
    pub async fn load(file: JsonFile<Vec<ApiKeyRecord>>) -> Result<Self, GatewayError> {
        let records = file.load().await.map_err(storage_err)?;
        let keys = records
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();
        Ok(Self {
            file,
            keys: Mutex::new(keys),
        })
    }

    pub async fn create(
        &self,
        name: Option<String>,
        rate_limit: Option<RateLimitPolicy>,
        supplied_key: Option<String>,
    ) -> Result<ApiKeyRecord, GatewayError> {
        let mut keys = self.keys.lock().await;
        let key = match supplied_key {
            Some(value) => {
                if keys.contains_key(&value) {
                    return Err(GatewayError::InvalidRequest(
                        "an API key with this value already exists".to_string(),
                    ));
                }
                value
            }
            None => generate_key(),
        };
        let record = ApiKeyRecord {
            key: key.clone(),
            name: name.unwrap_or_else(|| "unnamed".to_string()),
            created_iso: now_iso(),
            last_used_iso: None,
            requests: 0,
            rate_limit: rate_limit.unwrap_or_default(),
            usage_buckets: Default::default(),
        };
        keys.insert(key, record.clone());
        self.persist(&keys).await?;
        Ok(record)
    }

    /// In-memory only: bumps counters, never touches the disk.
    pub async fn validate(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().await;
        match keys.get_mut(key) {
            Some(record) => {
                record.requests += 1;
                record.last_used_iso = Some(now_iso());
                true
            }
            None => false,
        }
    }

    pub async fn check_rate_limit(&self, key: &str) -> RateLimitDecision {
        self.check_rate_limit_at(key, now_ms()).await
    }

    pub(crate) async fn check_rate_limit_at(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        let mut keys = self.keys.lock().await;
        let Some(record) = keys.get_mut(key) else {
            return RateLimitDecision {
                allowed: false,
                reason: Some("unknown key".to_string()),
                ..Default::default()
            };
        };

        if !record.rate_limit.enabled {
            return RateLimitDecision {
                allowed: true,
                ..Default::default()
            };
        }

        let window = record.rate_limit.window_ms;
        let cap = record.rate_limit.max_requests;
        let horizon = now_ms.saturating_sub(window);
        record.usage_buckets.retain(|bucket, _| *bucket > horizon);

        let count: u64 = record.usage_buckets.values().map(|value| *value as u64).sum();
        if count >= cap as u64 {
            // The map can be empty when the purge just ran with cap == 0.
            let reset_in_s = record
                .usage_buckets
                .keys()
                .next()
                .map(|oldest| (oldest + window).saturating_sub(now_ms).div_ceil(1000))
                .unwrap_or(window.div_ceil(1000));
            return RateLimitDecision {
                allowed: false,
                limit: Some(cap),
                remaining: Some(0),
                reset_in_s: Some(reset_in_s),
                reason: Some("rate limit exceeded".to_string()),
            };
        }

        let bucket = bucket_for(now_ms);
        *record.usage_buckets.entry(bucket).or_insert(0) += 1;
        RateLimitDecision {
            allowed: true,
            limit: Some(cap),
            remaining: Some(cap.saturating_sub(count as u32 + 1)),
            reset_in_s: None,
            reason: None,
        }
    }

    pub async fn update_rate_limit(
        &self,
        key: &str,
        policy: RateLimitPolicy,
    ) -> Result<(), GatewayError> {
        let mut keys = self.keys.lock().await;
        let record = keys
            .get_mut(key)
            .ok_or(GatewayError::Unauthorized)?;
        record.rate_limit = policy;
        self.persist(&keys).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        let mut keys = self.keys.lock().await;
        if keys.remove(key).is_none() {
            return Err(GatewayError::InvalidRequest(format!(
                "no such API key: {key}"
            )));
        }
        self.persist(&keys).await
    }

    pub async fn stats(&self) -> KeyStats {
        let keys = self.keys.lock().await;
        KeyStats {
            keys: keys.len(),
            total_requests: keys.values().map(|record| record.requests).sum(),
        }
    }

    pub async fn flush(&self) -> Result<(), GatewayError> {
        let keys = self.keys.lock().await;
        self.persist(&keys).await
    }

    pub fn spawn_flush_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = store.flush().await {
                    warn!(event = "keys.flush", error = %err);
                }
            }
        })
    }

    async fn persist(&self, keys: &HashMap<String, ApiKeyRecord>) -> Result<(), GatewayError> {
        let mut records: Vec<ApiKeyRecord> = keys.values().cloned().collect();
        records.sort_by(|a, b| a.created_iso.cmp(&b.created_iso));
        self.file.write(&records).await.map_err(storage_err)
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("{KEY_PREFIX}{hex}")
}

fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn now_ms() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

fn storage_err(err: gravgate_storage::StoreError) -> GatewayError {
    GatewayError::Storage(err.to_string())
}
