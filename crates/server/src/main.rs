use server::config;
use server::db;
use server::routes;

use axum::http::HeaderValue;
use axum::{routing::get, Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env();

    // Connect to Postgres
    tracing::info!("Connecting to database...");
    let pool = db::pool::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run schema migrations
    tracing::info!("Running migrations...");
    db::pool::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    // Seed the puzzle bank from CSV on first run
    let puzzle_count = db::puzzles::count(&pool)
        .await
        .expect("Failed to count puzzles");
    if puzzle_count == 0 {
        if let Some(csv_path) = config.puzzle_csv.clone() {
            tracing::info!("Puzzle bank is empty — seeding from {}...", csv_path.display());
            tokio::spawn({
                let pool = pool.clone();
                async move {
                    match db::puzzles::seed_from_csv(&pool, &csv_path).await {
                        Ok(count) => tracing::info!("Seeded {} puzzles", count),
                        Err(e) => tracing::warn!("Failed to seed puzzles: {}", e),
                    }
                }
            });
        } else {
            tracing::warn!("Puzzle bank is empty and PUZZLE_CSV is not set");
        }
    } else {
        tracing::info!("Puzzle bank holds {} puzzles", puzzle_count);
    }

    // CORS: a single allowed origin when configured, otherwise open
    let cors = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<HeaderValue>().expect("Invalid CORS_ORIGIN"))
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    // Build router
    let app = Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        // Puzzles
        .route("/api/puzzles/random", get(routes::puzzles::get_random_puzzle))
        .route("/api/puzzles/stats", get(routes::puzzles::get_puzzle_stats))
        // Interactive replay
        .route("/api/play", get(routes::play::ws_handler))
        // Shared state
        .layer(Extension(pool))
        .layer(Extension(config.clone()))
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}
