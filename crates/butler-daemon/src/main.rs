//! butler-daemon entry point.
//!
//! Thin by design, same as the teacher's own `main.rs`: load config, run the
//! module lifecycle, wire the tool registry, serve, and on signal run the
//! shutdown orchestrator in the exact five-step order (§4.L).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use butler_buffer::{BufferConfig, DurableBuffer};
use butler_daemon::builtin_modules::{RateLimiterModule, SchedulerModule};
use butler_daemon::ingest_tool::{IngestProcessor, IngestTool};
use butler_daemon::modules::{run_lifecycle, Module, ModuleStatus};
use butler_daemon::recovery::recover_route_inbox;
use butler_daemon::{AcceptingConnections, AppState, HttpSdkQuery, RouteExecuteTool};
use butler_egress_guard::EgressOwnershipFilter;
use butler_rpc::ToolRegistry;
use butler_spawner::Spawner;
use tower_http::cors::CorsLayer;
use tracing::info;

const ENV_CONFIG_PATH: &str = "BUTLER_CONFIG_PATH";
const ENV_SESSION_ENDPOINT: &str = "BUTLER_SESSION_ENDPOINT";
const ENV_DAEMON_ADDR: &str = "BUTLER_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    butler_telemetry::init_tracing();

    let config_path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| "butler.toml".to_string());
    let config = butler_config::load_butler_toml(&config_path)
        .with_context(|| format!("loading {config_path}"))?;

    let pool = butler_db::connect_from_env().await.context("connecting to Postgres")?;

    let egress_filter = Arc::new(EgressOwnershipFilter::new(config.butler.name.clone()));

    let mut modules: Vec<Arc<dyn Module>> = vec![Arc::new(SchedulerModule::new(
        pool.clone(),
        config.butler.schedules.clone(),
    ))];
    let ratelimit_module = if config.is_messenger() {
        let module = Arc::new(RateLimiterModule::new());
        modules.push(module.clone() as Arc<dyn Module>);
        Some(module)
    } else {
        None
    };

    let report = run_lifecycle(&modules, &config.modules).await;
    for name in &report.order {
        info!(module = %name, status = ?report.statuses[name], "module lifecycle result");
    }

    let session_endpoint = std::env::var(ENV_SESSION_ENDPOINT)
        .with_context(|| format!("missing env var {ENV_SESSION_ENDPOINT}"))?;
    let spawner = Arc::new(Spawner::new(Arc::new(HttpSdkQuery::new(session_endpoint)), Some(pool.clone())));

    let recovered = recover_route_inbox(&pool, &spawner, config.is_switchboard())
        .await
        .context("route_inbox startup recovery failed")?;
    info!(recovered, "startup recovery complete");

    let rate_limiter = ratelimit_module.and_then(|m| m.limiter());

    // The ingest buffer and its `ingest` tool exist only on the switchboard
    // (§4.E, §6); every other butler leaves both fields `None`.
    let ingest_buffer = if config.is_switchboard() {
        let buffer = Arc::new(DurableBuffer::new(BufferConfig::default(), Some(pool.clone())));
        buffer.start(Arc::new(IngestProcessor::new(spawner.clone()))).await;
        Some(buffer)
    } else {
        None
    };

    let state = Arc::new(AppState {
        pool: pool.clone(),
        spawner: spawner.clone(),
        egress_filter: egress_filter.clone(),
        accepting: Arc::new(AcceptingConnections::new()),
        rate_limiter,
        // TODO: wire a concrete ChannelProvider per configured channel once
        // channel adapters are built; butler-testkit ships the in-memory one
        // used by tests in the meantime.
        delivery_provider: None,
        delivery_config: butler_delivery::DeliveryConfig::default(),
        ingest_buffer: ingest_buffer.clone(),
    });

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RouteExecuteTool::new(state.clone())));
    if let Some(buffer) = &ingest_buffer {
        registry.register(Arc::new(IngestTool::new(pool.clone(), buffer.clone())));
    }

    let app = butler_rpc::build_router(Arc::new(registry))
        .layer(butler_telemetry::http_trace_layer())
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], config.butler.port)));
    info!("butler-daemon ({}) listening on http://{}", config.butler.name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("server crashed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    let module_statuses: Vec<(Arc<dyn Module>, ModuleStatus)> = modules
        .into_iter()
        .map(|m| {
            let status = report.statuses.get(m.name()).cloned().unwrap_or(ModuleStatus::CascadeFailed);
            (m, status)
        })
        .collect();

    butler_daemon::run_shutdown(butler_daemon::ShutdownPlan {
        accepting: &state.accepting,
        spawner: Some(&spawner),
        ingest_buffer: ingest_buffer.as_ref(),
        modules: &module_statuses,
        pool: Some(&pool),
        timeout: Duration::from_secs(config.butler.shutdown.timeout_s),
    })
    .await;

    Ok(())
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(ENV_DAEMON_ADDR).ok()?.parse().ok()
}

/// CORS: allow only localhost origins, same policy the teacher applies.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
