// Delivery-risk recalculation engine
use axum::routing::{patch, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod errors;
mod facade;
mod helpers;
mod routes;
mod secrets;
mod services;

use config::AppConfig;
use db::quota::QuotaLimits;
use facade::FacadeState;
use services::forecast::ForecastClient;
use services::route::RouteClient;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 10;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "triprisk_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    let route_api_key = secrets::read_secret(&config.route_api_key_file);
    if route_api_key.is_none() {
        tracing::warn!("no primary route provider key found, falling back to the open provider");
    }
    let forecast_api_key = secrets::read_secret(&config.forecast_api_key_file)
        .expect("forecast provider key is required (config-missing)");

    let route_client = RouteClient::new(route_api_key, &config.user_agent);
    let forecast_client = ForecastClient::new(forecast_api_key, &config.user_agent);

    let route_limits = QuotaLimits {
        global_daily: config.route_daily_limit,
        global_per_minute: config.route_per_min_limit,
    };
    let owm_limits = QuotaLimits {
        global_daily: config.owm_daily_limit,
        global_per_minute: config.owm_per_min_limit,
    };

    let (jobs, job_rx) = services::broker::channel(config.scan_batch_size as usize * 4);

    tokio::spawn(services::scheduler::run_scheduler(
        pool.clone(),
        jobs.clone(),
        config.scan_interval_seconds,
        config.scan_batch_size,
    ));

    for worker_id in 0..config.recalc_worker_count {
        let pool = pool.clone();
        let route_client = route_client.clone();
        let forecast_client = forecast_client.clone();
        let job_rx = job_rx.clone();
        tokio::spawn(async move {
            tracing::info!("recalc worker {} started", worker_id);
            loop {
                let job = {
                    let mut rx = job_rx.lock().await;
                    rx.recv().await
                };
                match job {
                    Some(services::broker::Job::RecalcTrip { trip_id }) => {
                        services::recalculator::process_job(
                            &pool,
                            &route_client,
                            &forecast_client,
                            route_limits,
                            owm_limits,
                            trip_id,
                        )
                        .await;
                    }
                    Some(services::broker::Job::ScanDueTrips) => {
                        tracing::debug!("worker {} received a scan trigger job", worker_id);
                    }
                    None => {
                        tracing::info!("recalc worker {} shutting down, channel closed", worker_id);
                        break;
                    }
                }
            }
        });
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::PATCH])
        .allow_headers(Any);

    let facade_state = FacadeState {
        pool: pool.clone(),
        jobs,
    };

    let app = Router::new()
        .route("/api/v1/health", axum::routing::get(routes::health::health_check))
        .route(
            "/api/v1/trips/:id/enqueue-recalc",
            post(facade::enqueue_recalc_handler),
        )
        .route("/api/v1/trips/:id/policy", patch(facade::patch_policy_handler))
        .with_state(facade_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("triprisk-engine listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
