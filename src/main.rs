//! Elidune Circulation Server
//!
//! REST API and maintenance runner for the loan and reservation lifecycle.

use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use elidune_circulation::{
    api,
    clock::SystemClock,
    config::{AppConfig, LoggingConfig},
    repository::{CirculationStore, MemoryStore, PgStore},
    services::{notifications::Notifier, CirculationContext, Services},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    // Held for the whole run so buffered file logs get flushed
    let _log_guard = init_tracing(&config.logging);

    tracing::info!("Starting Elidune Circulation v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn CirculationStore> = if config.database.is_memory() {
        tracing::warn!("Using in-memory store, nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .connect(&config.database.url)
            .await
            .context("Failed to connect to database")?;
        tracing::info!("Connected to database");

        let store = PgStore::new(pool);
        store.migrate().await.context("Failed to run database migrations")?;
        tracing::info!("Database migrations completed");
        Arc::new(store)
    };

    let notifier = Notifier::from_config(&config.email, &config.notifications);
    let ctx = CirculationContext::new(
        store,
        Arc::new(SystemClock),
        config.circulation.clone(),
        notifier,
    );
    let services = Services::new(ctx);

    if config.maintenance.enabled {
        let every = Duration::from_secs(config.maintenance.interval_minutes.max(1) * 60);
        services
            .maintenance
            .clone()
            .spawn(every, config.maintenance.run_on_startup);
        tracing::info!(
            interval_minutes = config.maintenance.interval_minutes,
            "Maintenance sweep scheduled"
        );
    }

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    let app = create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Console output (pretty or json) plus an optional daily-rolling file
fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("elidune_circulation={},tower_http=debug", config.level).into()
    });

    let json = config.format.eq_ignore_ascii_case("json");
    let console_json = json.then(|| fmt::layer().json());
    let console_pretty = (!json).then(fmt::layer);

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "elidune-circulation.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_pretty)
        .with(file_layer)
        .init();

    guard
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Loans
        .route("/loans", post(api::loans::create_loan))
        .route("/loans/:id", get(api::loans::get_loan))
        .route("/loans/:id/approve", post(api::loans::approve_loan))
        .route("/loans/:id/reject", post(api::loans::reject_loan))
        .route("/loans/:id/pickup", post(api::loans::confirm_pickup))
        .route("/loans/:id/return", post(api::loans::return_loan))
        .route("/loans/:id/renew", post(api::loans::renew_loan))
        .route("/users/:id/loans", get(api::loans::get_user_loans))
        // Reservations
        .route("/reservations/:id", get(api::reservations::get_reservation))
        .route("/reservations/:id/cancel", post(api::reservations::cancel_reservation))
        // Books and copies
        .route("/books/:id/availability", get(api::books::get_availability))
        .route("/books/:id/reservations", get(api::books::get_queue))
        .route("/copies/:id/disposition", put(api::books::update_disposition))
        // Maintenance
        .route("/maintenance/sweep", post(api::maintenance::run_sweep))
        .with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}
