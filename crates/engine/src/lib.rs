//! Squeeze Discover Engine: staged candidate-discovery funnel
//!
//! Provides:
//! - Bulk and classification filters over the daily universe snapshot
//! - Technical enrichment with batched, bounded-concurrency history fetches
//! - Compression/momentum selector, pattern detector and squeeze scorer
//! - A coordinator that runs the funnel under a TTL run lock and publishes
//!   the ranked candidates plus a per-stage trace with a bounded lifetime
//! - Market data providers (HTTP gateway client, seeded synthetic market)

pub mod api;
pub mod config;
pub mod discovery;
pub mod enrichment;
pub mod error;
pub mod filters;
pub mod indicators;
pub mod pattern;
pub mod selector;
pub mod squeeze;
pub mod store;
pub mod trace;
pub mod types;

// Re-exports for convenience
pub use api::{MarketDataClient, NoShortInterest, ShortInterestProvider, SyntheticMarket, UniverseProvider};
pub use config::DiscoveryConfig;
pub use discovery::{
    rank_candidates, DiscoveryCoordinator, DiscoveryProgress, DiscoveryStatus, ProgressSnapshot, RunOutcome,
    RunSummary,
};
pub use error::{ConfigError, DiscoveryError, DiscoveryResult, StoreError};
pub use store::{
    Clock, CoordinationStore, InMemoryStore, ManualClock, SqliteCoordinationStore, SystemClock,
    LATEST_CANDIDATES_KEY, LATEST_TRACE_KEY, RUN_LOCK_KEY,
};
pub use trace::{RejectionReason, StageEntry, StageName, StageTrace};
pub use types::*;
