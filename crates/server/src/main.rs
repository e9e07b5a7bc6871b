//! Squeeze-Discover: staged squeeze-candidate discovery service
//!
//! Usage:
//!   squeeze-discover serve --port 3001 --interval-secs 3600   - HTTP API plus scheduler
//!   squeeze-discover run --synthetic-seed 7                     - One run from the CLI
//!   squeeze-discover purge                                      - Drop expired lock/result rows

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::{
    Candidate, DiscoveryConfig, DiscoveryCoordinator, MarketDataClient, RunOutcome, ShortInterestProvider,
    SqliteCoordinationStore, StageTrace, SyntheticMarket, SystemClock, UniverseProvider,
};
use persistence::repository::CoordinationRepository;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "data/squeeze.db";

#[derive(Parser)]
#[command(name = "squeeze-discover")]
#[command(about = "Staged short-squeeze candidate discovery", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API (and optional periodic trigger)
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
        /// Trigger a run every N seconds
        #[arg(long)]
        interval_secs: Option<u64>,
        /// JSON configuration file
        #[arg(long)]
        config: Option<String>,
        /// Use the seeded synthetic market instead of the HTTP gateway
        #[arg(long)]
        synthetic_seed: Option<u64>,
    },
    /// Execute one discovery run and print the result
    Run {
        /// JSON configuration file
        #[arg(long)]
        config: Option<String>,
        /// Use the seeded synthetic market instead of the HTTP gateway
        #[arg(long)]
        synthetic_seed: Option<u64>,
        /// Synthetic universe size
        #[arg(long, default_value_t = 2000)]
        universe_size: usize,
        /// Rows of the ranked table to print
        #[arg(long, default_value_t = 20)]
        top_n: usize,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Delete expired run locks and published results
    Purge,
}

#[derive(Clone)]
struct AppState {
    coordinator: Arc<DiscoveryCoordinator>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,squeeze_discover=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,squeeze_discover=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve {
            host,
            port,
            interval_secs,
            config,
            synthetic_seed,
        } => {
            cmd_serve(&host, port, interval_secs, config, synthetic_seed).await?;
        }
        Commands::Run {
            config,
            synthetic_seed,
            universe_size,
            top_n,
            export,
        } => {
            cmd_run(config, synthetic_seed, universe_size, top_n, export).await?;
        }
        Commands::Purge => {
            cmd_purge().await?;
        }
    }

    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

fn db_path() -> String {
    std::env::var("SQUEEZE_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

/// `--config` wins over `SQUEEZE_CONFIG_PATH`; neither means defaults
fn load_config(path: Option<String>) -> anyhow::Result<DiscoveryConfig> {
    let path = path.or_else(|| std::env::var("SQUEEZE_CONFIG_PATH").ok());
    match path {
        Some(path) => {
            let config = DiscoveryConfig::from_file(&path)?;
            info!(path = %path, "Configuration loaded");
            Ok(config)
        }
        None => Ok(DiscoveryConfig::default()),
    }
}

type Providers = (Arc<dyn UniverseProvider>, Arc<dyn ShortInterestProvider>);

fn build_providers(synthetic_seed: Option<u64>, universe_size: usize) -> anyhow::Result<Providers> {
    match synthetic_seed {
        Some(seed) => {
            info!(seed, universe_size, "Using synthetic market");
            let market = Arc::new(SyntheticMarket::new(seed, universe_size));
            let universe: Arc<dyn UniverseProvider> = market.clone();
            let short_interest: Arc<dyn ShortInterestProvider> = market;
            Ok((universe, short_interest))
        }
        None => {
            let client = Arc::new(MarketDataClient::from_env()?);
            let universe: Arc<dyn UniverseProvider> = client.clone();
            let short_interest: Arc<dyn ShortInterestProvider> = client;
            Ok((universe, short_interest))
        }
    }
}

async fn build_coordinator(
    config: DiscoveryConfig,
    providers: Providers,
) -> anyhow::Result<DiscoveryCoordinator> {
    let db_path = db_path();
    let db = persistence::Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Coordination database: {}", db_path);

    let clock = Arc::new(SystemClock);
    let store = Arc::new(SqliteCoordinationStore::new(db.pool_clone(), clock.clone()));
    let (universe, short_interest) = providers;
    Ok(DiscoveryCoordinator::new(config, universe, short_interest, store, clock)?)
}

// ============================================================================
// Serve command
// ============================================================================

async fn cmd_serve(
    host: &str,
    port: u16,
    interval_secs: Option<u64>,
    config: Option<String>,
    synthetic_seed: Option<u64>,
) -> anyhow::Result<()> {
    info!("Squeeze-Discover v{} starting...", APP_VERSION);

    let mut config = load_config(config)?;
    if interval_secs.is_some() {
        config.coordination.schedule_interval_secs = interval_secs;
    }
    let interval = config.coordination.schedule_interval_secs;

    let providers = build_providers(synthetic_seed, 2000)?;
    let coordinator = Arc::new(build_coordinator(config, providers).await?);

    if let Some(secs) = interval {
        spawn_scheduler(coordinator.clone(), Duration::from_secs(secs));
    }

    let state = AppState { coordinator };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/discover", post(api_trigger_run))
        .route("/discover/status", get(api_run_status))
        .route("/candidates", get(api_latest_candidates))
        .route("/trace", get(api_latest_trace))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Squeeze-Discover v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  POST /api/discover            - Trigger a run (?wait=true to await it)");
    println!("  GET  /api/discover/status     - Run progress");
    println!("  GET  /api/candidates          - Latest ranked candidates (?limit=N)");
    println!("  GET  /api/trace               - Latest stage trace");
    match interval {
        Some(secs) => println!("\n  Scheduler: every {}s", secs),
        None => println!("\n  Scheduler: disabled"),
    }
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Fire a run every `every`. Each tick is its own task, so a run that
/// overruns the interval makes the next tick skip on the lock.
fn spawn_scheduler(coordinator: Arc<DiscoveryCoordinator>, every: Duration) {
    info!(interval_secs = every.as_secs(), "Scheduler started");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator.run_once().await {
                    warn!(error = %e, "Scheduled run failed");
                }
            });
        }
    });
}

// ============================================================================
// Run command
// ============================================================================

async fn cmd_run(
    config: Option<String>,
    synthetic_seed: Option<u64>,
    universe_size: usize,
    top_n: usize,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== Squeeze-Discover v{} ===", APP_VERSION);

    let config = load_config(config)?;
    let providers = build_providers(synthetic_seed, universe_size)?;
    let coordinator = build_coordinator(config, providers).await?;

    let summary = match coordinator.run_once().await? {
        RunOutcome::Completed(summary) => summary,
        RunOutcome::Skipped => {
            println!("Another run holds the lock; nothing to do.");
            return Ok(());
        }
    };

    let candidates = coordinator.latest_candidates().await?;
    let trace = coordinator.latest_trace().await?;

    if let Some(trace) = &trace {
        print_trace(trace);
    }
    print_candidates(&candidates, top_n);
    println!(
        "\nRun {} finished: {} candidates from a universe of {}",
        summary.run_id, summary.candidate_count, summary.universe_size
    );

    if let Some(path) = export {
        let json = serde_json::json!({
            "generated_at": Utc::now().to_rfc3339(),
            "summary": summary,
            "candidates": candidates,
            "trace": trace,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&json)?)?;
        println!("Exported to {}", path);
    }

    Ok(())
}

fn print_trace(trace: &StageTrace) {
    println!("\nStage trace (universe {}):", trace.universe_size);
    println!("  {:<24} {:>7} {:>7}  {}", "Stage", "In", "Out", "Rejections");
    println!("  {}", "-".repeat(75));
    for entry in &trace.stages {
        let reasons: Vec<String> = entry
            .rejection_reasons
            .iter()
            .map(|(reason, count)| format!("{}={}", reason.label(), count))
            .collect();
        println!(
            "  {:<24} {:>7} {:>7}  {}",
            entry.stage.label(),
            entry.count_in,
            entry.count_out,
            reasons.join(", ")
        );
    }
}

fn print_candidates(candidates: &[Candidate], top_n: usize) {
    println!("\nTop {} Candidates:", candidates.len().min(top_n));
    println!(
        "  {:>3}  {:<8} {:>9} {:>8} {:>8} {:>7} {:>8}  {:<8}",
        "#", "Symbol", "Price", "Squeeze", "Pattern", "Spike", "Mom%", "Tier"
    );
    println!("  {}", "-".repeat(75));
    for c in candidates.iter().take(top_n) {
        println!(
            "  {:>3}  {:<8} {:>9} {:>8.3} {:>8.3} {:>6.1}x {:>+7.1}%  {:<8}",
            c.rank,
            c.symbol,
            c.price.round_dp(2),
            c.squeeze_score,
            c.pattern_similarity_score,
            c.volume_spike,
            c.momentum_pct,
            c.confidence,
        );
    }
}

// ============================================================================
// Purge command
// ============================================================================

async fn cmd_purge() -> anyhow::Result<()> {
    let db_path = db_path();
    let db = persistence::Database::new(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;

    let repo = CoordinationRepository::new(db.pool());
    let purged = repo
        .purge_expired(Utc::now().timestamp_millis())
        .await
        .map_err(|e| anyhow::anyhow!("Purge failed: {}", e))?;

    info!("Done! Purged {} expired rows from {}", purged, db_path);
    Ok(())
}

// ============================================================================
// API handlers
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "squeeze-discover",
        "version": APP_VERSION,
    }))
}

#[derive(Debug, Deserialize)]
struct TriggerParams {
    #[serde(default)]
    wait: bool,
}

/// POST /api/discover: trigger a run
///
/// Without `wait`, answers before the run starts. A lock held by any process
/// sharing the database answers `already_running`; a lock taken between this
/// check and the spawned run's acquire still turns that run into a skip,
/// visible as `runs_skipped` on the status endpoint.
async fn api_trigger_run(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> (StatusCode, Json<serde_json::Value>) {
    let coordinator = state.coordinator;

    if !params.wait {
        let holder = match coordinator.lock_holder().await {
            Ok(holder) => holder,
            Err(e) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "success": false, "outcome": "failed", "error": e.to_string() })),
                );
            }
        };
        if holder.is_some() || coordinator.progress().is_running() {
            return (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": false,
                    "outcome": "already_running",
                    "lock_holder": holder,
                })),
            );
        }
        tokio::spawn(async move {
            if let Err(e) = coordinator.run_once().await {
                warn!(error = %e, "Triggered run failed");
            }
        });
        return (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "success": true, "outcome": "started" })),
        );
    }

    match coordinator.run_once().await {
        Ok(RunOutcome::Completed(summary)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "outcome": "completed", "summary": summary })),
        ),
        Ok(RunOutcome::Skipped) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": false, "outcome": "already_running" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "success": false, "outcome": "failed", "error": e.to_string() })),
        ),
    }
}

/// GET /api/discover/status: this process's progress plus the live lock holder
async fn api_run_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let lock_holder = match state.coordinator.lock_holder().await {
        Ok(holder) => holder,
        Err(e) => {
            warn!(error = %e, "Failed to read run lock");
            None
        }
    };
    Json(serde_json::json!({
        "progress": state.coordinator.progress().snapshot(),
        "lock_holder": lock_holder,
    }))
}

#[derive(Debug, Deserialize)]
struct CandidatesParams {
    limit: Option<usize>,
}

/// GET /api/candidates: latest published ranked list, empty once expired
async fn api_latest_candidates(
    State(state): State<AppState>,
    Query(params): Query<CandidatesParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut candidates = state
        .coordinator
        .latest_candidates()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if let Some(limit) = params.limit {
        candidates.truncate(limit);
    }

    Ok(Json(serde_json::json!({
        "count": candidates.len(),
        "candidates": candidates,
    })))
}

/// GET /api/trace: latest published stage trace, null once expired
async fn api_latest_trace(
    State(state): State<AppState>,
) -> Result<Json<Option<StageTrace>>, (StatusCode, String)> {
    let trace = state
        .coordinator
        .latest_trace()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(trace))
}
