mod analyzer;
mod config;
mod correlator;
mod detector;
mod error;
mod handlers;
mod incident_manager;
mod models;
mod notify;
mod observability;
mod pipeline;
mod runbooks;
mod store;

use axum::{Router, routing::get};
use clickhouse::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use analyzer::Analyzer;
use config::SentinelConfig;
use incident_manager::IncidentManager;
use notify::{Notifier, PagerDutyNotifier, SlackNotifier};
use observability::ObservabilityClient;
use pipeline::{Pipeline, spawn_pipeline};
use store::IncidentStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<IncidentStore>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("sentinel_ops=debug,tower_http=debug")
        }))
        .init();
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("SENTINEL_CONFIG").unwrap_or_else(|_| "./sentinel.toml".to_string());
    let cfg = match SentinelConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "observability".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);
    let obs = ObservabilityClient::new(ch, cfg.indexes.clone());

    if let Err(e) = obs.ping().await {
        tracing::error!("observability backend unreachable at {clickhouse_url}: {e}");
        std::process::exit(2);
    }
    tracing::info!("connected to observability backend at {clickhouse_url}");

    let store = Arc::new(IncidentStore::new(
        cfg.incidents.max_incidents,
        cfg.incidents.dedup_cooldown_minutes,
    ));

    let llm = Analyzer::from_env(&cfg.analyzer);
    if llm.is_none() {
        tracing::warn!("LLM_API_KEY not set; incidents will be created without analysis");
    }
    let chat = SlackNotifier::from_env().map(|n| Box::new(n) as Box<dyn Notifier>);
    if chat.is_none() {
        tracing::warn!("SLACK_WEBHOOK_URL not set; chat notifications disabled");
    }
    let paging = PagerDutyNotifier::from_env().map(|n| Box::new(n) as Box<dyn Notifier>);
    if paging.is_none() {
        tracing::warn!("PAGERDUTY_ROUTING_KEY not set; paging disabled");
    }

    let manager = IncidentManager::new(store.clone(), llm, chat, paging, cfg.incidents.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline_handle = spawn_pipeline(
        Pipeline {
            obs,
            manager,
            store: store.clone(),
            cfg: cfg.clone(),
        },
        shutdown_rx.clone(),
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("termination signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let state = AppState { store };
    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/services", get(handlers::services::list_services))
        .route("/incidents", get(handlers::incidents::list_incidents))
        .route("/incidents/{id}", get(handlers::incidents::get_incident))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("sentinel-ops listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    let mut serve_shutdown = shutdown_rx;
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = serve_shutdown.changed().await;
    });
    if let Err(e) = server.await {
        tracing::error!("http server error: {e}");
    }

    let _ = pipeline_handle.await;
    tracing::info!("sentinel-ops stopped");
}
