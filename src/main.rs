pub mod actuator;
pub mod api;
pub mod config;
pub mod controller;
pub mod evp;
pub mod publisher;
pub mod state;
pub mod timing;

#[cfg(test)]
mod test_support;

use axum::{routing::get, Json, Router};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use actuator::ActuatorPort;
use api::ApiDoc;
use config::Config;
use controller::Controller;
use publisher::StatePublisher;
use state::{IntersectionState, Topology};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    tracing::info!(
        group_a = %config.group_a.label,
        group_b = %config.group_b.label,
        "Loaded configuration"
    );

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static(api::AUTH_HEADER),
            ])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Initialize SQLite database for the cycle log
    let pool = SqlitePool::connect(&config.database_url)
        .await
        .expect("Failed to connect to SQLite database");

    tracing::info!(migrations = MIGRATOR.migrations.len(), "Found migrations");
    MIGRATOR.run(&pool).await.expect("Failed to run migrations");
    tracing::info!("Database migrations completed");

    // Shared intersection state and live publisher
    let topology = Topology::from_config(&config);
    let shared = IntersectionState::new(topology.clone(), config.timing.min_green_secs).shared();
    let publisher = StatePublisher::new(Some(pool.clone()));
    let snapshots = publisher.sender();

    // Hardware signal controller (optional, failures non-fatal)
    let actuator_port = ActuatorPort::connect(&config.actuator).await;

    // Start the phase scheduler in the background
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Controller::new(
        shared.clone(),
        topology,
        config.timing.clone(),
        config.evp.clone(),
        actuator_port,
        publisher,
        shutdown_rx,
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    // Build the app
    let api_state = api::AppState {
        shared,
        pool: pool.clone(),
        snapshots,
        evp_config: config.evp.clone(),
        auth_token: config.auth_token.clone(),
    };
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(api::router(api_state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind listen address");
    tracing::info!(addr = %config.listen_addr, "Phase scheduler API running");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Failed to start server");

    // Stop the scheduler so it can command the intersection to all-red
    // before the process exits.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
}

async fn root() -> &'static str {
    "Crossflow Phase Scheduler API"
}
