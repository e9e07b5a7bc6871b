//! Database schema definitions

/// SQL to create all tables
/// NOTE: timestamps are epoch milliseconds supplied by the caller's clock
pub const CREATE_TABLES: &str = r#"
-- Mutual-exclusion tokens for discovery runs
CREATE TABLE IF NOT EXISTS run_locks (
    lock_key TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Latest published artifacts (ranked candidates, stage trace)
CREATE TABLE IF NOT EXISTS published_results (
    result_key TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    published_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_published_expiry ON published_results(expires_at);
CREATE INDEX IF NOT EXISTS idx_locks_expiry ON run_locks(expires_at)
"#;
