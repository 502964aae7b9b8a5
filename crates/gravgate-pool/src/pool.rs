use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use gravgate_common::GatewayError;
use gravgate_storage::JsonFile;
use gravgate_storage::entities::CredentialRecord;

use crate::refresh::TokenRefresher;

/// How long the in-memory view of `accounts.json` stays fresh before
/// `get_token` re-reads the file.
const RELOAD_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct CredentialUsage {
    pub requests: u64,
    pub last_used_ms: i64,
}

#[derive(Debug, Clone)]
pub struct UsageSnapshot {
    pub total_requests: u64,
    pub credentials: Vec<UsageEntry>,
}

#[derive(Debug, Clone)]
pub struct UsageEntry {
    /// Last characters of the refresh token, enough to tell entries apart
    /// without exposing the secret.
    pub token_tail: String,
    pub email: Option<String>,
    pub enabled: bool,
    pub requests: u64,
    pub last_used_ms: i64,
}

struct PoolInner {
    records: Vec<CredentialRecord>,
    /// Round-robin position within the enabled subsequence.
    cursor: usize,
    usage: HashMap<String, CredentialUsage>,
    last_reload: Instant,
}

/// Rotating, self-refreshing OAuth2 credential pool backed by
/// `accounts.json`. All mutation happens under one mutex; refresh I/O runs
/// outside it against a snapshot and commits with a compare-update keyed by
/// refresh token.
pub struct CredentialPool {
    file: JsonFile<Vec<CredentialRecord>>,
    refresher: Arc<dyn TokenRefresher>,
    inner: Mutex<PoolInner>,
}

impl CredentialPool {
    pub async fn load(
        file: JsonFile<Vec<CredentialRecord>>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<Self, GatewayError> {
        let records = file.load().await.map_err(storage_err)?;
        Ok(Self {
            file,
            refresher,
            inner: Mutex::new(PoolInner {
                records,
                cursor: 0,
                usage: HashMap::new(),
                last_reload: Instant::now(),
            }),
        })
    }

    /// Hand out a ready-to-use credential, refreshing or rotating as needed.
    pub async fn get_token(&self) -> Result<CredentialRecord, GatewayError> {
        let mut guard = self.inner.lock().await;
        if guard.last_reload.elapsed() >= RELOAD_INTERVAL {
            self.reload(&mut guard).await?;
        }

        let max_attempts = enabled_indexes(&guard.records).len();
        let mut attempts = 0usize;
        loop {
            let enabled = enabled_indexes(&guard.records);
            if enabled.is_empty() || attempts >= max_attempts {
                return Err(GatewayError::NoCredentials);
            }
            if guard.cursor >= enabled.len() {
                guard.cursor = 0;
            }
            let index = enabled[guard.cursor];

            if !guard.records[index].needs_refresh(now_ms()) {
                return Ok(take_at(&mut guard, index));
            }

            let target = guard.records[index].clone();
            drop(guard);
            let outcome = self.refresher.refresh(&target.refresh_token).await;
            guard = self.inner.lock().await;

            match outcome {
                Ok(grant) => {
                    let Some(pos) = position_of(&guard.records, &target.refresh_token) else {
                        attempts += 1;
                        continue;
                    };
                    {
                        let record = &mut guard.records[pos];
                        record.access_token = grant.access_token;
                        record.expires_in = grant.expires_in;
                        record.issued_at_ms = now_ms();
                    }
                    self.persist(&guard).await?;
                    if guard.records[pos].enabled {
                        return Ok(take_at(&mut guard, pos));
                    }
                    attempts += 1;
                }
                Err(err) if err.is_forbidden() => {
                    warn!(
                        event = "pool.refresh_forbidden",
                        token_tail = %token_tail(&target.refresh_token),
                        "identity provider rejected the refresh token, disabling credential"
                    );
                    if let Some(pos) = position_of(&guard.records, &target.refresh_token) {
                        guard.records[pos].enabled = false;
                    }
                    self.persist(&guard).await?;
                    self.reload(&mut guard).await?;
                    attempts += 1;
                }
                Err(err) => {
                    debug!(event = "pool.refresh_failed", error = %err, "transient refresh failure, rotating on");
                    let enabled_count = enabled_indexes(&guard.records).len();
                    if enabled_count > 0 {
                        guard.cursor = (guard.cursor + 1) % enabled_count;
                    }
                    attempts += 1;
                }
            }
        }
    }

    /// Upstream rejected a request with 403 while using `cred`: disable it
    /// permanently and hand back the next viable token.
    pub async fn on_upstream_forbidden(
        &self,
        cred: &CredentialRecord,
    ) -> Result<CredentialRecord, GatewayError> {
        {
            let mut guard = self.inner.lock().await;
            if let Some(pos) = position_of(&guard.records, &cred.refresh_token) {
                warn!(
                    event = "pool.upstream_forbidden",
                    token_tail = %token_tail(&cred.refresh_token),
                    "upstream returned 403, disabling credential"
                );
                guard.records[pos].enabled = false;
                self.persist(&guard).await?;
            }
            self.reload(&mut guard).await?;
        }
        self.get_token().await
    }

    /// Admit a credential obtained through the OAuth code exchange.
    pub async fn admit_grant(
        &self,
        grant: crate::refresh::TokenGrant,
        email: Option<String>,
        display_name: Option<String>,
    ) -> Result<(), GatewayError> {
        let refresh_token = grant.refresh_token.ok_or_else(|| {
            GatewayError::InvalidRequest(
                "token grant did not include a refresh_token".to_string(),
            )
        })?;
        self.add(CredentialRecord {
            access_token: grant.access_token,
            refresh_token,
            expires_in: grant.expires_in,
            issued_at_ms: now_ms(),
            enabled: true,
            email,
            display_name,
        })
        .await
    }

    pub async fn add(&self, record: CredentialRecord) -> Result<(), GatewayError> {
        let mut guard = self.inner.lock().await;
        validate_new(&guard.records, &record)?;
        guard.records.push(record);
        self.persist(&guard).await
    }

    /// Insert many credentials at once, skipping duplicates. Returns how
    /// many were actually inserted.
    pub async fn bulk_add(&self, records: Vec<CredentialRecord>) -> Result<usize, GatewayError> {
        let mut guard = self.inner.lock().await;
        let mut inserted = 0usize;
        for record in records {
            if validate_new(&guard.records, &record).is_err() {
                continue;
            }
            guard.records.push(record);
            inserted += 1;
        }
        if inserted > 0 {
            self.persist(&guard).await?;
        }
        Ok(inserted)
    }

    pub async fn delete(&self, index: usize) -> Result<CredentialRecord, GatewayError> {
        let mut guard = self.inner.lock().await;
        if index >= guard.records.len() {
            return Err(GatewayError::InvalidRequest(format!(
                "credential index {index} out of range"
            )));
        }
        let removed = guard.records.remove(index);
        guard.usage.remove(&removed.refresh_token);
        clamp_cursor(&mut guard);
        self.persist(&guard).await?;
        Ok(removed)
    }

    pub async fn toggle(&self, index: usize, enabled: bool) -> Result<(), GatewayError> {
        let mut guard = self.inner.lock().await;
        if index >= guard.records.len() {
            return Err(GatewayError::InvalidRequest(format!(
                "credential index {index} out of range"
            )));
        }
        guard.records[index].enabled = enabled;
        clamp_cursor(&mut guard);
        self.persist(&guard).await
    }

    pub async fn usage_snapshot(&self) -> UsageSnapshot {
        let guard = self.inner.lock().await;
        let mut credentials = Vec::with_capacity(guard.records.len());
        let mut total_requests = 0u64;
        for record in &guard.records {
            let usage = guard
                .usage
                .get(&record.refresh_token)
                .cloned()
                .unwrap_or_default();
            total_requests += usage.requests;
            credentials.push(UsageEntry {
                token_tail: token_tail(&record.refresh_token),
                email: record.email.clone(),
                enabled: record.enabled,
                requests: usage.requests,
                last_used_ms: usage.last_used_ms,
            });
        }
        UsageSnapshot {
            total_requests,
            credentials,
        }
    }

    pub async fn list(&self) -> Vec<CredentialRecord> {
        self.inner.lock().await.records.clone()
    }

    async fn persist(&self, guard: &PoolInner) -> Result<(), GatewayError> {
        self.file.write(&guard.records).await.map_err(storage_err)
    }

    async fn reload(&self, guard: &mut PoolInner) -> Result<(), GatewayError> {
        guard.records = self.file.load().await.map_err(storage_err)?;
        guard.last_reload = Instant::now();
        clamp_cursor(guard);
        Ok(())
    }
}

fn take_at(guard: &mut PoolInner, index: usize) -> CredentialRecord {
    let record = guard.records[index].clone();
    let enabled_count = enabled_indexes(&guard.records).len();
    if enabled_count > 0 {
        guard.cursor = (guard.cursor + 1) % enabled_count;
    }
    let usage = guard.usage.entry(record.refresh_token.clone()).or_default();
    usage.requests += 1;
    usage.last_used_ms = now_ms();
    record
}

fn enabled_indexes(records: &[CredentialRecord]) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.enabled)
        .map(|(index, _)| index)
        .collect()
}

fn position_of(records: &[CredentialRecord], refresh_token: &str) -> Option<usize> {
    records
        .iter()
        .position(|record| record.refresh_token == refresh_token)
}

fn clamp_cursor(guard: &mut PoolInner) {
    let enabled_count = enabled_indexes(&guard.records).len();
    if enabled_count == 0 {
        guard.cursor = 0;
    } else if guard.cursor >= enabled_count {
        guard.cursor = 0;
    }
}

fn validate_new(
    records: &[CredentialRecord],
    record: &CredentialRecord,
) -> Result<(), GatewayError> {
    if record.refresh_token.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(
            "credential refresh_token must not be empty".to_string(),
        ));
    }
    if position_of(records, &record.refresh_token).is_some() {
        return Err(GatewayError::InvalidRequest(
            "credential with this refresh_token already exists".to_string(),
        ));
    }
    Ok(())
}

fn token_tail(refresh_token: &str) -> String {
    let chars: Vec<char> = refresh_token.chars().collect();
    let start = chars.len().saturating_sub(6);
    format!("…{}", chars[start..].iter().collect::<String>())
}

fn storage_err(err: gravgate_storage::StoreError) -> GatewayError {
    GatewayError::Storage(err.to_string())
}

pub(crate) fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
