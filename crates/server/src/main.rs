// authwatch-server: ingests security events from host collectors, runs
// the periodic detection rules, and serves the alert/ban/dashboard API.

use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};

use authwatch_server::db::Database;
use authwatch_server::{build_router, detectors, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authwatch_server=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let port: u16 = args
        .iter()
        .position(|a| a == "--port" || a == "-p")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            std::env::var("AUTHWATCH_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or(5010);

    let data_dir = args
        .iter()
        .position(|a| a == "--data-dir" || a == "-d")
        .and_then(|i| args.get(i + 1))
        .map(std::path::PathBuf::from)
        .or_else(|| {
            std::env::var("AUTHWATCH_DATA_DIR")
                .ok()
                .map(std::path::PathBuf::from)
        })
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("authwatch")
        });
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");

    let db_path = data_dir.join("authwatch.db");
    tracing::info!("database: {:?}", db_path);
    tracing::info!("port: {}", port);

    let db = Database::open(&db_path).expect("Failed to open database");
    let state = AppState::shared(db);

    detectors::spawn_detectors(Arc::clone(&state));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = build_router(state).layer(cors);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("authwatch-server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");
    tracing::info!("shutting down...");
}
