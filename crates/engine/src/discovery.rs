//! Discovery coordinator
//!
//! Runs the funnel end to end under the run lock:
//! universe -> bulk -> classification -> enrichment -> selector -> pattern -> squeeze,
//! then publishes the ranked candidates and the stage trace together.

use std::cmp::Ordering as CmpOrdering;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, RwLock,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::api::{ShortInterestProvider, UniverseProvider};
use crate::config::DiscoveryConfig;
use crate::enrichment::enrich;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::filters::{apply_bulk_filter, apply_classification_filter};
use crate::pattern::apply_pattern_detector;
use crate::selector::apply_selector;
use crate::squeeze::score_squeeze;
use crate::store::{Clock, CoordinationStore, LATEST_CANDIDATES_KEY, LATEST_TRACE_KEY, RUN_LOCK_KEY};
use crate::trace::{StageEntry, StageName, StageTrace};
use crate::types::Candidate;

// ============================================================================
// Run state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// What a completed run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub config_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub universe_size: usize,
    pub candidate_count: usize,
    pub top_symbol: Option<String>,
}

/// Result of a trigger. Lock contention is a skip, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunSummary),
    Skipped,
}

/// Shared progress tracker, readable while a run is in flight
pub struct DiscoveryProgress {
    pub status: RwLock<DiscoveryStatus>,
    pub current_stage: RwLock<Option<StageName>>,
    pub run_id: RwLock<Option<String>>,
    pub started_at: RwLock<Option<String>>,
    pub error_message: RwLock<Option<String>>,
    pub last_summary: RwLock<Option<RunSummary>>,
    pub runs_completed: AtomicU32,
    pub runs_skipped: AtomicU32,
    pub runs_failed: AtomicU32,
}

/// Point-in-time copy of [`DiscoveryProgress`] for the API
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: DiscoveryStatus,
    pub current_stage: Option<StageName>,
    pub run_id: Option<String>,
    pub started_at: Option<String>,
    pub error_message: Option<String>,
    pub last_summary: Option<RunSummary>,
    pub runs_completed: u32,
    pub runs_skipped: u32,
    pub runs_failed: u32,
}

fn set<T>(lock: &RwLock<T>, value: T) {
    if let Ok(mut guard) = lock.write() {
        *guard = value;
    }
}

fn get<T: Clone + Default>(lock: &RwLock<T>) -> T {
    lock.read().map(|g| g.clone()).unwrap_or_default()
}

impl DiscoveryProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(DiscoveryStatus::Idle),
            current_stage: RwLock::new(None),
            run_id: RwLock::new(None),
            started_at: RwLock::new(None),
            error_message: RwLock::new(None),
            last_summary: RwLock::new(None),
            runs_completed: AtomicU32::new(0),
            runs_skipped: AtomicU32::new(0),
            runs_failed: AtomicU32::new(0),
        }
    }

    fn begin(&self, run_id: &str, started_at: DateTime<Utc>) {
        set(&self.status, DiscoveryStatus::Running);
        set(&self.current_stage, None);
        set(&self.run_id, Some(run_id.to_string()));
        set(&self.started_at, Some(started_at.to_rfc3339()));
        set(&self.error_message, None);
    }

    fn enter_stage(&self, stage: StageName) {
        set(&self.current_stage, Some(stage));
    }

    fn complete(&self, summary: RunSummary) {
        set(&self.status, DiscoveryStatus::Completed);
        set(&self.current_stage, None);
        set(&self.last_summary, Some(summary));
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn fail(&self, message: String) {
        set(&self.status, DiscoveryStatus::Failed);
        set(&self.current_stage, None);
        set(&self.error_message, Some(message));
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> DiscoveryStatus {
        self.status.read().map(|s| *s).unwrap_or(DiscoveryStatus::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.status() == DiscoveryStatus::Running
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status(),
            current_stage: get(&self.current_stage),
            run_id: get(&self.run_id),
            started_at: get(&self.started_at),
            error_message: get(&self.error_message),
            last_summary: get(&self.last_summary),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_skipped: self.runs_skipped.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for DiscoveryProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Ranking
// ============================================================================

/// Squeeze score desc, pattern similarity desc, symbol asc
fn candidate_order(a: &Candidate, b: &Candidate) -> CmpOrdering {
    b.squeeze_score
        .total_cmp(&a.squeeze_score)
        .then_with(|| b.pattern_similarity_score.total_cmp(&a.pattern_similarity_score))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(candidate_order);
    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = i + 1;
    }
}

fn new_run_id(now: DateTime<Utc>) -> String {
    format!("{}-{:08x}", now.format("%Y%m%dT%H%M%S%3fZ"), rand::random::<u32>())
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct DiscoveryCoordinator {
    config: DiscoveryConfig,
    fingerprint: String,
    universe: Arc<dyn UniverseProvider>,
    short_interest: Arc<dyn ShortInterestProvider>,
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    progress: Arc<DiscoveryProgress>,
}

impl DiscoveryCoordinator {
    pub fn new(
        config: DiscoveryConfig,
        universe: Arc<dyn UniverseProvider>,
        short_interest: Arc<dyn ShortInterestProvider>,
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
    ) -> DiscoveryResult<Self> {
        config.validate()?;
        let fingerprint = config.fingerprint();
        Ok(Self {
            config,
            fingerprint,
            universe,
            short_interest,
            store,
            clock,
            progress: Arc::new(DiscoveryProgress::new()),
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn progress(&self) -> Arc<DiscoveryProgress> {
        self.progress.clone()
    }

    /// Execute one discovery run.
    ///
    /// Returns `Skipped` without touching any state if another run holds the
    /// lock. On failure nothing is published and the lock is released. A run
    /// that outlives its lock fails with `LockLost` instead of publishing.
    pub async fn run_once(&self) -> DiscoveryResult<RunOutcome> {
        let run_id = new_run_id(self.clock.now());
        let lock_ttl = Duration::from_secs(self.config.coordination.lock_ttl_secs);

        if !self.store.try_acquire_lock(RUN_LOCK_KEY, &run_id, lock_ttl).await? {
            self.progress.runs_skipped.fetch_add(1, Ordering::Relaxed);
            info!(run_id = %run_id, "Discovery run skipped: another run holds the lock");
            return Ok(RunOutcome::Skipped);
        }

        let started_at = self.clock.now();
        self.progress.begin(&run_id, started_at);
        info!(run_id = %run_id, config = %self.fingerprint, "Discovery run started");

        let result = match self.execute(&run_id, started_at).await {
            Ok((candidates, trace)) => self.publish(&run_id, &candidates, &trace).await.map(|_| RunSummary {
                run_id: run_id.clone(),
                config_fingerprint: self.fingerprint.clone(),
                started_at,
                finished_at: trace.finished_at.unwrap_or(started_at),
                universe_size: trace.universe_size,
                candidate_count: candidates.len(),
                top_symbol: candidates.first().map(|c| c.symbol.clone()),
            }),
            Err(e) => Err(e),
        };

        // Expiry is the fallback if this fails
        match self.store.release_lock(RUN_LOCK_KEY, &run_id).await {
            Ok(true) => {}
            Ok(false) => warn!(run_id = %run_id, "Run lock expired before release"),
            Err(e) => warn!(run_id = %run_id, error = %e, "Failed to release run lock"),
        }

        match result {
            Ok(summary) => {
                info!(
                    run_id = %run_id,
                    universe = summary.universe_size,
                    candidates = summary.candidate_count,
                    top = summary.top_symbol.as_deref().unwrap_or("-"),
                    "Discovery run completed"
                );
                self.progress.complete(summary.clone());
                Ok(RunOutcome::Completed(summary))
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Discovery run failed");
                self.progress.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn record(&self, trace: &mut StageTrace, entry: StageEntry) {
        info!(
            run_id = %trace.run_id,
            stage = entry.stage.label(),
            count_in = entry.count_in,
            count_out = entry.count_out,
            rejected = entry.rejected(),
            "Stage complete"
        );
        trace.record(entry);
    }

    async fn execute(&self, run_id: &str, started_at: DateTime<Utc>) -> DiscoveryResult<(Vec<Candidate>, StageTrace)> {
        let config = &self.config;

        let universe = self
            .universe
            .fetch_universe()
            .await
            .map_err(|e| DiscoveryError::UniverseUnavailable(format!("{e:#}")))?;
        let mut trace = StageTrace::new(run_id, &self.fingerprint, universe.len(), started_at);

        self.progress.enter_stage(StageName::BulkFilter);
        let bulk = apply_bulk_filter(universe, &config.bulk);
        self.record(&mut trace, bulk.entry);

        self.progress.enter_stage(StageName::ClassificationFilter);
        let classified = apply_classification_filter(bulk.survivors, &config.classification);
        self.record(&mut trace, classified.entry);

        self.progress.enter_stage(StageName::TechnicalEnrichment);
        let enriched = enrich(classified.survivors, self.universe.as_ref(), &config.enrichment).await;
        self.record(&mut trace, enriched.entry);

        self.progress.enter_stage(StageName::CompressionSelector);
        let selected = apply_selector(enriched.survivors, &config.selector);
        self.record(&mut trace, selected.entry);

        self.progress.enter_stage(StageName::PatternDetector);
        let patterns = apply_pattern_detector(selected.survivors, &config.pattern);
        self.record(&mut trace, patterns.entry);

        self.progress.enter_stage(StageName::SqueezeScorer);
        let scored = score_squeeze(
            patterns.survivors,
            self.short_interest.as_ref(),
            &config.squeeze,
            &config.tiers,
        )
        .await;
        self.record(&mut trace, scored.entry);

        let mut candidates = scored.survivors;
        rank_candidates(&mut candidates);
        trace.finalize(self.clock.now());

        Ok((candidates, trace))
    }

    async fn publish(&self, run_id: &str, candidates: &[Candidate], trace: &StageTrace) -> DiscoveryResult<()> {
        let entries = vec![
            (LATEST_CANDIDATES_KEY.to_string(), serde_json::to_string(candidates)?),
            (LATEST_TRACE_KEY.to_string(), serde_json::to_string(trace)?),
        ];
        let ttl = Duration::from_secs(self.config.coordination.result_ttl_secs);
        if !self.store.publish(RUN_LOCK_KEY, run_id, entries, ttl).await? {
            return Err(DiscoveryError::LockLost {
                run_id: run_id.to_string(),
            });
        }
        Ok(())
    }

    /// Run id currently holding the run lock, in this or any other process
    pub async fn lock_holder(&self) -> DiscoveryResult<Option<String>> {
        Ok(self.store.lock_holder(RUN_LOCK_KEY).await?)
    }

    /// Most recently published ranked list; empty if expired or never run
    pub async fn latest_candidates(&self) -> DiscoveryResult<Vec<Candidate>> {
        match self.store.fetch(LATEST_CANDIDATES_KEY).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn latest_trace(&self) -> DiscoveryResult<Option<StageTrace>> {
        match self.store.fetch(LATEST_TRACE_KEY).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NoShortInterest, SyntheticMarket};
    use crate::config::CoordinationConfig;
    use crate::store::{InMemoryStore, ManualClock, SystemClock};
    use crate::types::{Bar, UniverseRow};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    const SEED: u64 = 11;
    const UNIVERSE: usize = 400;

    /// Synthetic market whose universe call can be made to fail or to wait
    struct ScriptedUniverse {
        market: SyntheticMarket,
        fail: AtomicBool,
        gated: bool,
        entered: Notify,
        release: Notify,
    }

    impl ScriptedUniverse {
        fn new(gated: bool) -> Self {
            Self {
                market: SyntheticMarket::new(SEED, UNIVERSE),
                fail: AtomicBool::new(false),
                gated,
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl UniverseProvider for ScriptedUniverse {
        async fn fetch_universe(&self) -> Result<Vec<UniverseRow>> {
            if self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            self.market.fetch_universe().await
        }

        async fn fetch_history(&self, symbols: &[String], bars: usize) -> Result<HashMap<String, Vec<Bar>>> {
            self.market.fetch_history(symbols, bars).await
        }
    }

    fn coordinator(
        universe: Arc<dyn UniverseProvider>,
        clock: Arc<dyn Clock>,
        coordination: CoordinationConfig,
    ) -> (DiscoveryCoordinator, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let config = DiscoveryConfig {
            coordination,
            ..DiscoveryConfig::default()
        };
        let coordinator = DiscoveryCoordinator::new(
            config,
            universe,
            Arc::new(SyntheticMarket::new(SEED, UNIVERSE)),
            store.clone(),
            clock,
        )
        .unwrap();
        (coordinator, store)
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 13, 30, 0).unwrap()))
    }

    fn synthetic() -> Arc<dyn UniverseProvider> {
        Arc::new(SyntheticMarket::new(SEED, UNIVERSE))
    }

    #[tokio::test]
    async fn test_identical_inputs_identical_output() {
        let (a, _) = coordinator(synthetic(), Arc::new(SystemClock), CoordinationConfig::default());
        let (b, _) = coordinator(synthetic(), Arc::new(SystemClock), CoordinationConfig::default());

        assert!(matches!(a.run_once().await.unwrap(), RunOutcome::Completed(_)));
        assert!(matches!(b.run_once().await.unwrap(), RunOutcome::Completed(_)));

        let candidates_a = a.latest_candidates().await.unwrap();
        let candidates_b = b.latest_candidates().await.unwrap();
        assert!(!candidates_a.is_empty());
        assert_eq!(candidates_a, candidates_b);

        let trace_a = a.latest_trace().await.unwrap().unwrap();
        let trace_b = b.latest_trace().await.unwrap().unwrap();
        assert_eq!(trace_a.stages, trace_b.stages);
        assert_eq!(trace_a.config_fingerprint, trace_b.config_fingerprint);
    }

    #[tokio::test]
    async fn test_trace_and_candidate_invariants() {
        let (coordinator, _) = coordinator(synthetic(), Arc::new(SystemClock), CoordinationConfig::default());
        coordinator.run_once().await.unwrap();

        let trace = coordinator.latest_trace().await.unwrap().unwrap();
        assert!(trace.is_consistent());
        assert!(trace.finished_at.is_some());
        let stages: Vec<StageName> = trace.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                StageName::BulkFilter,
                StageName::ClassificationFilter,
                StageName::TechnicalEnrichment,
                StageName::CompressionSelector,
                StageName::PatternDetector,
                StageName::SqueezeScorer,
            ]
        );

        let candidates = coordinator.latest_candidates().await.unwrap();
        assert_eq!(candidates.len(), trace.final_count());
        let tiers = &coordinator.config().tiers;
        for (i, c) in candidates.iter().enumerate() {
            assert_eq!(c.rank, i + 1);
            assert!((0.0..=1.0).contains(&c.squeeze_score));
            assert!((0.0..=1.0).contains(&c.pattern_similarity_score));
            assert_eq!(c.confidence, tiers.classify(c.squeeze_score));
        }
        for pair in candidates.windows(2) {
            assert_ne!(candidate_order(&pair[0], &pair[1]), CmpOrdering::Greater);
        }
        assert_eq!(coordinator.progress().status(), DiscoveryStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_skipped() {
        let universe = Arc::new(ScriptedUniverse::new(true));
        let (coordinator, _) = coordinator(universe.clone(), Arc::new(SystemClock), CoordinationConfig::default());
        let coordinator = Arc::new(coordinator);

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_once().await })
        };
        universe.entered.notified().await;
        let in_flight = coordinator.progress().snapshot().run_id;

        assert_eq!(coordinator.run_once().await.unwrap(), RunOutcome::Skipped);
        assert!(coordinator.progress().is_running());
        assert_eq!(coordinator.progress().snapshot().run_id, in_flight);

        universe.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        let RunOutcome::Completed(summary) = outcome else {
            panic!("first run should complete");
        };
        assert_eq!(Some(summary.run_id.clone()), in_flight);

        let trace = coordinator.latest_trace().await.unwrap().unwrap();
        assert_eq!(trace.run_id, summary.run_id);
        assert_eq!(coordinator.progress().runs_skipped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_abandoned_lock_recovers_after_ttl() {
        let clock = manual_clock();
        let (coordinator, store) = coordinator(synthetic(), clock.clone(), CoordinationConfig::default());

        // A run that crashed without releasing
        assert!(store
            .try_acquire_lock(RUN_LOCK_KEY, "crashed-run", Duration::from_secs(900))
            .await
            .unwrap());

        assert_eq!(coordinator.run_once().await.unwrap(), RunOutcome::Skipped);
        clock.advance(Duration::from_secs(899));
        assert_eq!(coordinator.run_once().await.unwrap(), RunOutcome::Skipped);
        clock.advance(Duration::from_secs(1));
        assert!(matches!(coordinator.run_once().await.unwrap(), RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_run_that_outlived_its_lock_does_not_publish() {
        let clock = manual_clock();
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new(clock.clone()));
        let build = |universe: Arc<dyn UniverseProvider>| {
            DiscoveryCoordinator::new(
                DiscoveryConfig::default(),
                universe,
                Arc::new(SyntheticMarket::new(SEED, UNIVERSE)),
                store.clone(),
                clock.clone(),
            )
            .unwrap()
        };

        let gated = Arc::new(ScriptedUniverse::new(true));
        let gated_provider: Arc<dyn UniverseProvider> = gated.clone();
        let slow = Arc::new(build(gated_provider));
        let newer = build(synthetic());

        let slow_run = {
            let slow = slow.clone();
            tokio::spawn(async move { slow.run_once().await })
        };
        gated.entered.notified().await;
        let slow_id = slow.lock_holder().await.unwrap().unwrap();

        clock.advance(Duration::from_secs(901));
        let RunOutcome::Completed(newer_summary) = newer.run_once().await.unwrap() else {
            panic!("successor should take the expired lock");
        };
        let published = newer.latest_candidates().await.unwrap();

        gated.release.notify_one();
        let err = slow_run.await.unwrap().unwrap_err();
        assert!(matches!(err, DiscoveryError::LockLost { ref run_id } if *run_id == slow_id));
        assert_eq!(slow.progress().status(), DiscoveryStatus::Failed);
        assert_eq!(slow.progress().snapshot().current_stage, None);

        let trace = newer.latest_trace().await.unwrap().unwrap();
        assert_eq!(trace.run_id, newer_summary.run_id);
        assert_eq!(newer.latest_candidates().await.unwrap(), published);
    }

    #[tokio::test]
    async fn test_lock_holder_visible_during_run() {
        let universe = Arc::new(ScriptedUniverse::new(true));
        let (coordinator, _) = coordinator(universe.clone(), Arc::new(SystemClock), CoordinationConfig::default());
        let coordinator = Arc::new(coordinator);
        assert_eq!(coordinator.lock_holder().await.unwrap(), None);

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_once().await })
        };
        universe.entered.notified().await;
        assert_eq!(coordinator.lock_holder().await.unwrap(), coordinator.progress().snapshot().run_id);

        universe.release.notify_one();
        run.await.unwrap().unwrap();
        assert_eq!(coordinator.lock_holder().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_published_result_expires() {
        let clock = manual_clock();
        let coordination = CoordinationConfig {
            result_ttl_secs: 600,
            ..CoordinationConfig::default()
        };
        let (coordinator, _) = coordinator(synthetic(), clock.clone(), coordination);
        coordinator.run_once().await.unwrap();

        clock.advance(Duration::from_secs(599));
        assert!(coordinator.latest_trace().await.unwrap().is_some());

        clock.advance(Duration::from_secs(2));
        assert!(coordinator.latest_candidates().await.unwrap().is_empty());
        assert!(coordinator.latest_trace().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_run_preserves_previous_result() {
        let universe = Arc::new(ScriptedUniverse::new(false));
        let (coordinator, _) = coordinator(universe.clone(), Arc::new(SystemClock), CoordinationConfig::default());

        let RunOutcome::Completed(first) = coordinator.run_once().await.unwrap() else {
            panic!("first run should complete");
        };
        let published = coordinator.latest_candidates().await.unwrap();

        universe.fail.store(true, Ordering::SeqCst);
        let err = coordinator.run_once().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::UniverseUnavailable(_)));
        assert_eq!(coordinator.progress().status(), DiscoveryStatus::Failed);
        assert_eq!(coordinator.progress().snapshot().current_stage, None);

        let trace = coordinator.latest_trace().await.unwrap().unwrap();
        assert_eq!(trace.run_id, first.run_id);
        assert_eq!(coordinator.latest_candidates().await.unwrap(), published);

        // Lock was released by the failed run
        universe.fail.store(false, Ordering::SeqCst);
        assert!(matches!(coordinator.run_once().await.unwrap(), RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_missing_short_interest_is_estimated() {
        let store = Arc::new(InMemoryStore::new(Arc::new(SystemClock)));
        let coordinator = DiscoveryCoordinator::new(
            DiscoveryConfig::default(),
            synthetic(),
            Arc::new(NoShortInterest),
            store,
            Arc::new(SystemClock),
        )
        .unwrap();
        coordinator.run_once().await.unwrap();

        for candidate in coordinator.latest_candidates().await.unwrap() {
            assert_eq!(
                candidate.factors["short_interest_score"].provenance,
                crate::types::Provenance::Estimated
            );
            assert!(candidate.thesis.contains("(estimated)"));
        }
    }

    #[test]
    fn test_rank_tie_breaks() {
        let base = |symbol: &str, squeeze: f64, pattern: f64| Candidate {
            rank: 0,
            symbol: symbol.to_string(),
            price: rust_decimal::Decimal::ONE,
            volume_spike: 2.0,
            momentum_pct: 5.0,
            explosive_score: 0.5,
            pattern_similarity_score: pattern,
            squeeze_score: squeeze,
            confidence: crate::types::ConfidenceTier::Low,
            thesis: String::new(),
            factors: Default::default(),
        };
        let mut candidates = vec![
            base("CCC", 0.6, 0.5),
            base("BBB", 0.6, 0.7),
            base("AAA", 0.6, 0.5),
            base("DDD", 0.9, 0.1),
        ];
        rank_candidates(&mut candidates);
        let order: Vec<(&str, usize)> = candidates.iter().map(|c| (c.symbol.as_str(), c.rank)).collect();
        assert_eq!(order, vec![("DDD", 1), ("BBB", 2), ("AAA", 3), ("CCC", 4)]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DiscoveryConfig::default();
        config.squeeze.weights.volume = 0.9;
        let result = DiscoveryCoordinator::new(
            config,
            synthetic(),
            Arc::new(NoShortInterest),
            Arc::new(InMemoryStore::new(Arc::new(SystemClock))),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }
}
