//! Ban reconciliation: collectors report the complete set of currently
//! active bans each cycle, and the stored snapshot is replaced wholesale.
//! The read view is the only record of "currently banned" between syncs.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authwatch_core::CoreError;

use crate::db::{BanEntry, SshBan};
use crate::error::ApiError;
use crate::window::{clamp, MAX_WINDOW_MINUTES};
use crate::SharedState;

const DEFAULT_BAN_WINDOW_MINUTES: i64 = 1_440;

#[derive(Debug, Deserialize)]
pub struct BanSyncRequest {
    pub agent_secret: String,
    #[serde(default)]
    pub bans: Vec<BanEntry>,
}

#[derive(Debug, Serialize)]
pub struct BanSyncAck {
    pub status: &'static str,
    pub bans: usize,
}

pub async fn sync_bans(
    State(state): State<SharedState>,
    Json(req): Json<BanSyncRequest>,
) -> Result<Json<BanSyncAck>, ApiError> {
    if req.agent_secret.is_empty() {
        return Err(CoreError::InvalidPayload("agent_secret is required".to_string()).into());
    }
    let (agent_id, hostname) = state.db.authenticate(&req.agent_secret)?;
    let now = Utc::now();
    state.db.replace_ban_snapshot(&agent_id, &req.bans, now)?;
    tracing::debug!(host = %hostname, bans = req.bans.len(), "ban snapshot replaced");
    Ok(Json(BanSyncAck {
        status: "ok",
        bans: req.bans.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BanListParams {
    pub minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BansResponse {
    pub window_minutes: i64,
    pub generated_at: DateTime<Utc>,
    pub bans: Vec<SshBan>,
}

pub async fn list_bans(
    State(state): State<SharedState>,
    Query(params): Query<BanListParams>,
) -> Result<Json<BansResponse>, ApiError> {
    let window_minutes = clamp(params.minutes, DEFAULT_BAN_WINDOW_MINUTES, MAX_WINDOW_MINUTES);
    let now = Utc::now();
    Ok(Json(BansResponse {
        window_minutes,
        generated_at: now,
        bans: state.db.list_bans(window_minutes, now)?,
    }))
}
