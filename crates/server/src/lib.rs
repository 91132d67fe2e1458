//! authwatch server library.
//!
//! Wires the persistence layer, the three periodic detectors and the
//! HTTP surface together. Exposed as a library so integration tests can
//! drive the real router against an in-memory store.

pub mod activity_api;
pub mod alerts_api;
pub mod bans_api;
pub mod db;
pub mod detectors;
pub mod error;
pub mod ingest;
pub mod login_index;
pub mod window;

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use chrono::{DateTime, Utc};

use db::Database;
use error::ApiError;

pub struct AppState {
    pub db: Database,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn shared(db: Database) -> SharedState {
        Arc::new(Self {
            db,
            start_time: Utc::now(),
        })
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/agents",
            get(ingest::list_agents).post(ingest::register_agent),
        )
        .route("/api/v1/events/batch", post(ingest::post_event_batch))
        .route("/api/v1/ssh_summary", get(activity_api::ssh_summary))
        .route("/api/v1/ssh_activity", get(activity_api::ssh_activity))
        .route("/api/v1/ssh_timeline", get(activity_api::ssh_timeline))
        .route("/api/v1/sudo_timeline", get(activity_api::sudo_timeline))
        .route("/api/v1/ssh_alerts", get(alerts_api::list_ssh_alerts))
        .route("/api/v1/ssh_alerts/:id", patch(alerts_api::update_ssh_alert))
        .route(
            "/api/v1/ssh_suspicious_logins",
            get(alerts_api::list_suspicious_logins),
        )
        .route(
            "/api/v1/ssh_suspicious_logins/:id",
            patch(alerts_api::update_suspicious_login),
        )
        .route("/api/v1/sudo_alerts", get(alerts_api::list_sudo_alerts))
        .route(
            "/api/v1/sudo_alerts/:id",
            patch(alerts_api::update_sudo_alert),
        )
        .route(
            "/api/v1/ssh_bans",
            get(bans_api::list_bans).post(bans_api::sync_bans),
        )
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let events_stored = state.db.raw_event_count()?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": (Utc::now() - state.start_time).num_seconds(),
        "events_stored": events_stored,
    })))
}
