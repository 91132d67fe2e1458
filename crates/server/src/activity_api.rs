//! Read-only windowed aggregations and timelines for the dashboard.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authwatch_core::CoreError;

use crate::db::{to_ms, HostSummary, IpActivity, SshTimelineEvent, SudoTimelineEvent, TopIp, TopUser};
use crate::error::ApiError;
use crate::login_index::LoginIndex;
use crate::window::{clamp, MAX_ALERT_LIMIT, MAX_SUMMARY_MINUTES, MAX_TIMELINE_LIMIT, MAX_WINDOW_MINUTES};
use crate::SharedState;

// ============================================================================
// SSH summary
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SummaryParams {
    pub minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SshSummaryResponse {
    pub window_minutes: i64,
    pub generated_at: DateTime<Utc>,
    pub hosts: Vec<HostSummary>,
    pub top_ips: Vec<TopIp>,
    pub top_users: Vec<TopUser>,
}

pub async fn ssh_summary(
    State(state): State<SharedState>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<SshSummaryResponse>, ApiError> {
    let window_minutes = clamp(params.minutes, 60, MAX_SUMMARY_MINUTES);
    let now = Utc::now();
    Ok(Json(SshSummaryResponse {
        window_minutes,
        generated_at: now,
        hosts: state.db.host_summary(window_minutes, now)?,
        top_ips: state.db.top_failed_ips(window_minutes, now)?,
        top_users: state.db.top_users(window_minutes, now)?,
    }))
}

// ============================================================================
// SSH activity (per-IP aggregates + recent events)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SshActivityResponse {
    pub window_minutes: i64,
    pub generated_at: DateTime<Utc>,
    pub ips: Vec<IpActivity>,
    pub events: Vec<SshTimelineEvent>,
}

pub async fn ssh_activity(
    State(state): State<SharedState>,
    Query(params): Query<ActivityParams>,
) -> Result<Json<SshActivityResponse>, ApiError> {
    let window_minutes = clamp(params.minutes, 240, MAX_WINDOW_MINUTES);
    let limit = clamp(params.limit, 50, MAX_ALERT_LIMIT);
    let now = Utc::now();
    Ok(Json(SshActivityResponse {
        window_minutes,
        generated_at: now,
        ips: state.db.ip_activity(window_minutes, now)?,
        events: state.db.recent_ssh_events(window_minutes, limit, now)?,
    }))
}

// ============================================================================
// SSH timeline (per IP, optionally per user)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SshTimelineParams {
    pub ip: Option<String>,
    pub username: Option<String>,
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SshTimelineResponse {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub window_minutes: i64,
    pub limit: i64,
    pub generated_at: DateTime<Utc>,
    pub events: Vec<SshTimelineEvent>,
}

pub async fn ssh_timeline(
    State(state): State<SharedState>,
    Query(params): Query<SshTimelineParams>,
) -> Result<Json<SshTimelineResponse>, ApiError> {
    let ip = match params.ip.as_deref() {
        Some(ip) if !ip.is_empty() => ip.to_string(),
        _ => return Err(CoreError::InvalidPayload("ip is required".to_string()).into()),
    };
    let window_minutes = clamp(params.minutes, 60, MAX_WINDOW_MINUTES);
    let limit = clamp(params.limit, 200, MAX_TIMELINE_LIMIT);
    let now = Utc::now();
    let events = state.db.ssh_timeline(
        &ip,
        params.username.as_deref().filter(|u| !u.is_empty()),
        window_minutes,
        limit,
        now,
    )?;
    Ok(Json(SshTimelineResponse {
        ip,
        username: params.username.filter(|u| !u.is_empty()),
        window_minutes,
        limit,
        generated_at: now,
        events,
    }))
}

// ============================================================================
// Sudo timeline (per sudo/target user, with source-IP attribution)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SudoTimelineParams {
    pub sudo_user: Option<String>,
    pub target_user: Option<String>,
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SudoTimelineResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sudo_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user: Option<String>,
    pub window_minutes: i64,
    pub limit: i64,
    pub generated_at: DateTime<Utc>,
    pub events: Vec<SudoTimelineEvent>,
}

pub async fn sudo_timeline(
    State(state): State<SharedState>,
    Query(params): Query<SudoTimelineParams>,
) -> Result<Json<SudoTimelineResponse>, ApiError> {
    let sudo_user = params.sudo_user.filter(|u| !u.is_empty());
    let target_user = params.target_user.filter(|u| !u.is_empty());
    if sudo_user.is_none() && target_user.is_none() {
        return Err(
            CoreError::InvalidPayload("sudo_user or target_user is required".to_string()).into(),
        );
    }
    let window_minutes = clamp(params.minutes, 60, MAX_WINDOW_MINUTES);
    let limit = clamp(params.limit, 200, MAX_TIMELINE_LIMIT);
    let now = Utc::now();

    let rows = state.db.sudo_timeline(
        sudo_user.as_deref(),
        target_user.as_deref(),
        window_minutes,
        limit,
        now,
    )?;

    // Best-effort source-IP attribution, same predecessor search the
    // sudo detector uses.
    let index = LoginIndex::build(state.db.success_login_rows(window_minutes, now)?);
    let events = rows
        .into_iter()
        .map(|(agent_id, mut ev)| {
            if let Some(ip) = index.source_ip_at(&agent_id, to_ms(ev.ts)) {
                ev.remote_ip = ip.to_string();
            }
            ev
        })
        .collect();

    Ok(Json(SudoTimelineResponse {
        sudo_user,
        target_user,
        window_minutes,
        limit,
        generated_at: now,
        events,
    }))
}
