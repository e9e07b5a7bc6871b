//! Coordination repository: run lock and TTL-bounded published results
//!
//! All timestamps are epoch milliseconds passed in by the caller. A row whose
//! `expires_at` is not strictly greater than `now_ms` is treated as absent.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Current holder of a run lock
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunLockRecord {
    pub lock_key: String,
    pub holder: String,
    pub acquired_at: i64,
    pub expires_at: i64,
}

/// A single published artifact
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PublishedResultRecord {
    pub result_key: String,
    pub run_id: String,
    pub payload: String,
    pub published_at: i64,
    pub expires_at: i64,
}

/// Repository for the run lock and published results
pub struct CoordinationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CoordinationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Acquire `lock_key` for `holder` if it is free or its previous holder expired.
    ///
    /// Single upsert statement, so two racing callers cannot both win.
    pub async fn try_acquire_lock(
        &self,
        lock_key: &str,
        holder: &str,
        now_ms: i64,
        ttl_ms: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO run_locks (lock_key, holder, acquired_at, expires_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(lock_key) DO UPDATE SET
                 holder = excluded.holder,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
               WHERE run_locks.expires_at <= ?3"#,
        )
        .bind(lock_key)
        .bind(holder)
        .bind(now_ms)
        .bind(now_ms.saturating_add(ttl_ms))
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the lock only if `holder` still owns it
    pub async fn release_lock(&self, lock_key: &str, holder: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM run_locks WHERE lock_key = ? AND holder = ?")
            .bind(lock_key)
            .bind(holder)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the live holder of a lock, if any
    pub async fn get_live_lock(&self, lock_key: &str, now_ms: i64) -> DbResult<Option<RunLockRecord>> {
        let record = sqlx::query_as::<_, RunLockRecord>(
            r#"SELECT lock_key, holder, acquired_at, expires_at
               FROM run_locks
               WHERE lock_key = ? AND expires_at > ?"#,
        )
        .bind(lock_key)
        .bind(now_ms)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Upsert every record in one transaction (all or nothing), fenced on
    /// `holder` still owning a live `lock_key`.
    ///
    /// Returns `false` and writes nothing if the lock expired or moved on.
    pub async fn publish_results_if_held(
        &self,
        lock_key: &str,
        holder: &str,
        now_ms: i64,
        records: &[PublishedResultRecord],
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        // A write, so the transaction holds the database write lock from here on
        let held = sqlx::query(
            r#"UPDATE run_locks SET holder = holder
               WHERE lock_key = ? AND holder = ? AND expires_at > ?"#,
        )
        .bind(lock_key)
        .bind(holder)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        if held.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for record in records {
            sqlx::query(
                r#"INSERT INTO published_results
                     (result_key, run_id, payload, published_at, expires_at)
                   VALUES (?1, ?2, ?3, ?4, ?5)
                   ON CONFLICT(result_key) DO UPDATE SET
                     run_id = excluded.run_id,
                     payload = excluded.payload,
                     published_at = excluded.published_at,
                     expires_at = excluded.expires_at"#,
            )
            .bind(&record.result_key)
            .bind(&record.run_id)
            .bind(&record.payload)
            .bind(record.published_at)
            .bind(record.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Get a published result that has not yet expired
    pub async fn get_live_result(
        &self,
        result_key: &str,
        now_ms: i64,
    ) -> DbResult<Option<PublishedResultRecord>> {
        let record = sqlx::query_as::<_, PublishedResultRecord>(
            r#"SELECT result_key, run_id, payload, published_at, expires_at
               FROM published_results
               WHERE result_key = ? AND expires_at > ?"#,
        )
        .bind(result_key)
        .bind(now_ms)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Delete expired locks and results, returning the number of rows removed
    pub async fn purge_expired(&self, now_ms: i64) -> DbResult<u64> {
        let locks = sqlx::query("DELETE FROM run_locks WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(self.pool)
            .await?;
        let results = sqlx::query("DELETE FROM published_results WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(self.pool)
            .await?;

        Ok(locks.rows_affected() + results.rows_affected())
    }
}
