//! Coordination store: run lock and published results, both with TTLs
//!
//! The coordinator only talks to [`CoordinationStore`]. Time comes from an
//! injected [`Clock`] so expiry can be driven by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use persistence::repository::{CoordinationRepository, PublishedResultRecord};
use persistence::SqlitePool;
use tracing::debug;

use crate::error::StoreError;

pub const RUN_LOCK_KEY: &str = "squeeze_discovery:run_lock";
pub const LATEST_CANDIDATES_KEY: &str = "squeeze_discovery:latest_candidates";
pub const LATEST_TRACE_KEY: &str = "squeeze_discovery:latest_trace";

// ============================================================================
// Clock
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_ms: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.now_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Store trait
// ============================================================================

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Take `key` for `holder` unless a live lock exists. Never blocks.
    async fn try_acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Release `key` if `holder` still owns it. Returns whether it did.
    async fn release_lock(&self, key: &str, holder: &str) -> Result<bool, StoreError>;

    /// Publish every `(key, payload)` pair with one expiry, all or nothing,
    /// only while `holder` still owns a live `lock_key`. Returns whether it
    /// published; a run whose lock expired or was taken over writes nothing.
    async fn publish(
        &self,
        lock_key: &str,
        holder: &str,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Current live holder of `key`, if any
    async fn lock_holder(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Live payload for `key`; expired entries read as absent
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError>;
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    /// key -> (holder, expires_at_ms)
    locks: HashMap<String, (String, i64)>,
    /// key -> (payload, expires_at_ms)
    results: HashMap<String, (String, i64)>,
}

/// Single-process store; every operation runs under one mutex
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock,
        }
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn try_acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state()?;
        if let Some((_, expires_at)) = state.locks.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        state
            .locks
            .insert(key.to_string(), (holder.to_string(), now.saturating_add(ttl_ms(ttl))));
        Ok(true)
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        match state.locks.get(key) {
            Some((owner, _)) if owner == holder => {
                state.locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish(
        &self,
        lock_key: &str,
        holder: &str,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add(ttl_ms(ttl));
        let mut state = self.state()?;
        let held = matches!(
            state.locks.get(lock_key),
            Some((owner, lock_expires)) if owner == holder && *lock_expires > now
        );
        if !held {
            return Ok(false);
        }
        for (key, payload) in entries {
            state.results.insert(key, (payload, expires_at));
        }
        Ok(true)
    }

    async fn lock_holder(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let state = self.state()?;
        Ok(state
            .locks
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(holder, _)| holder.clone()))
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let mut state = self.state()?;
        match state.results.get(key) {
            Some((payload, expires_at)) if *expires_at > now => Ok(Some(payload.clone())),
            Some(_) => {
                state.results.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// Durable store shared by every process using the same database file
pub struct SqliteCoordinationStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteCoordinationStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn repo(&self) -> CoordinationRepository<'_> {
        CoordinationRepository::new(&self.pool)
    }
}

#[async_trait]
impl CoordinationStore for SqliteCoordinationStore {
    async fn try_acquire_lock(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        Ok(self.repo().try_acquire_lock(key, holder, now, ttl_ms(ttl)).await?)
    }

    async fn release_lock(&self, key: &str, holder: &str) -> Result<bool, StoreError> {
        Ok(self.repo().release_lock(key, holder).await?)
    }

    async fn publish(
        &self,
        lock_key: &str,
        holder: &str,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add(ttl_ms(ttl));
        let records: Vec<PublishedResultRecord> = entries
            .into_iter()
            .map(|(result_key, payload)| PublishedResultRecord {
                result_key,
                run_id: holder.to_string(),
                payload,
                published_at: now,
                expires_at,
            })
            .collect();

        let repo = self.repo();
        if !repo.publish_results_if_held(lock_key, holder, now, &records).await? {
            return Ok(false);
        }

        let purged = repo.purge_expired(now).await?;
        if purged > 0 {
            debug!(purged, "Purged expired coordination rows");
        }
        Ok(true)
    }

    async fn lock_holder(&self, key: &str) -> Result<Option<String>, StoreError> {
        let lock = self.repo().get_live_lock(key, self.clock.now_ms()).await?;
        Ok(lock.map(|l| l.holder))
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        let record = self.repo().get_live_result(key, self.clock.now_ms()).await?;
        Ok(record.map(|r| r.payload))
    }
}
