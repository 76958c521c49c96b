use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shortly_server::{
    config::ServerConfig, db::Database, fulfillment, metrics::register_metrics, routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = ServerConfig::from_env().expect("Failed to load configuration");
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;
    let dev_mode = config.dev_mode;

    tracing::info!("Starting shortly-server on port {}", port);
    tracing::info!("Merchant id: {}", config.merchant_id);
    tracing::info!("Gateway host: {}", config.gateway_host);
    tracing::info!("Callback URL: {}/api/orders/payment/callback", config.backend_url);

    // Initialize database
    let db = Database::new(&config.db_path).expect("Failed to initialize database");
    tracing::info!("Database initialized at: {}", config.db_path);

    // Seed the catalog on first boot
    match db.seed_default_products() {
        Ok(0) => {}
        Ok(n) => tracing::info!("Seeded {n} catalog products"),
        Err(e) => tracing::warn!("Failed to seed catalog: {e}"),
    }

    // Surface fulfillment work left over from previous runs; the worker
    // picks it up on its first scans.
    match db.pending_fulfillment_jobs() {
        Ok(0) => {}
        Ok(n) => tracing::info!("{n} fulfillment jobs pending from previous runs"),
        Err(e) => tracing::warn!("Failed to count pending fulfillment jobs: {e}"),
    }

    // Register Prometheus metrics
    register_metrics();

    // Create shared state and start the fulfillment outbox worker
    let state = AppState::new(config, db);
    fulfillment::spawn_worker(state.db.clone());
    let state_data = web::Data::new(state);

    // Configure rate limiter
    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .expect("Failed to create rate limiter config");

    // Start HTTP server
    HttpServer::new(move || {
        let cors = shortly_server::cors::build_cors(&allowed_origins);

        let mut app = App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(routes::health::configure)
            .configure(routes::callback::configure)
            .configure(routes::orders::configure);

        if dev_mode {
            app = app.configure(routes::orders::configure_dev);
        }

        app
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
