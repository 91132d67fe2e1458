//! Alert lifecycle API: filtered, windowed listings and status
//! transitions for the three alert kinds. No transition history is kept;
//! only the current status survives.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authwatch_core::AlertStatus;

use crate::db::{
    SshAlert, SshAlertFilter, SudoAlert, SudoAlertFilter, SuspiciousLogin, SuspiciousLoginFilter,
};
use crate::error::ApiError;
use crate::window::{clamp, MAX_ALERT_LIMIT, MAX_WINDOW_MINUTES};
use crate::SharedState;

const DEFAULT_WINDOW_MINUTES: i64 = 60;
const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

// ============================================================================
// Brute-force alerts
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SshAlertParams {
    pub status: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SshAlertsResponse {
    pub window_minutes: i64,
    pub limit: i64,
    pub generated_at: DateTime<Utc>,
    pub alerts: Vec<SshAlert>,
}

pub async fn list_ssh_alerts(
    State(state): State<SharedState>,
    Query(params): Query<SshAlertParams>,
) -> Result<Json<SshAlertsResponse>, ApiError> {
    let window_minutes = clamp(params.minutes, DEFAULT_WINDOW_MINUTES, MAX_WINDOW_MINUTES);
    let limit = clamp(params.limit, DEFAULT_LIMIT, MAX_ALERT_LIMIT);
    let now = Utc::now();
    let filter = SshAlertFilter {
        status: params.status,
        ip: params.ip,
        hostname: params.hostname,
        window_minutes,
        limit,
    };
    Ok(Json(SshAlertsResponse {
        window_minutes,
        limit,
        generated_at: now,
        alerts: state.db.list_ssh_alerts(&filter, now)?,
    }))
}

pub async fn update_ssh_alert(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<SshAlert>, ApiError> {
    let status = AlertStatus::parse(&req.status)?;
    Ok(Json(state.db.update_ssh_alert_status(id, status)?))
}

// ============================================================================
// Suspicious logins
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SuspiciousLoginParams {
    pub status: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SuspiciousLoginsResponse {
    pub window_minutes: i64,
    pub limit: i64,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<SuspiciousLogin>,
}

pub async fn list_suspicious_logins(
    State(state): State<SharedState>,
    Query(params): Query<SuspiciousLoginParams>,
) -> Result<Json<SuspiciousLoginsResponse>, ApiError> {
    let window_minutes = clamp(params.minutes, DEFAULT_WINDOW_MINUTES, MAX_WINDOW_MINUTES);
    let limit = clamp(params.limit, DEFAULT_LIMIT, MAX_ALERT_LIMIT);
    let now = Utc::now();
    let filter = SuspiciousLoginFilter {
        status: params.status,
        ip: params.ip,
        hostname: params.hostname,
        username: params.username,
        window_minutes,
        limit,
    };
    Ok(Json(SuspiciousLoginsResponse {
        window_minutes,
        limit,
        generated_at: now,
        items: state.db.list_suspicious_logins(&filter, now)?,
    }))
}

pub async fn update_suspicious_login(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<SuspiciousLogin>, ApiError> {
    let status = AlertStatus::parse(&req.status)?;
    Ok(Json(state.db.update_suspicious_login_status(id, status)?))
}

// ============================================================================
// Sudo alerts
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SudoAlertParams {
    pub status: Option<String>,
    pub sudo_user: Option<String>,
    pub target_user: Option<String>,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub minutes: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SudoAlertsResponse {
    pub window_minutes: i64,
    pub limit: i64,
    pub generated_at: DateTime<Utc>,
    pub alerts: Vec<SudoAlert>,
}

pub async fn list_sudo_alerts(
    State(state): State<SharedState>,
    Query(params): Query<SudoAlertParams>,
) -> Result<Json<SudoAlertsResponse>, ApiError> {
    let window_minutes = clamp(params.minutes, DEFAULT_WINDOW_MINUTES, MAX_WINDOW_MINUTES);
    let limit = clamp(params.limit, DEFAULT_LIMIT, MAX_ALERT_LIMIT);
    let now = Utc::now();
    let filter = SudoAlertFilter {
        status: params.status,
        sudo_user: params.sudo_user,
        target_user: params.target_user,
        ip: params.ip,
        hostname: params.hostname,
        window_minutes,
        limit,
    };
    Ok(Json(SudoAlertsResponse {
        window_minutes,
        limit,
        generated_at: now,
        alerts: state.db.list_sudo_alerts(&filter, now)?,
    }))
}

pub async fn update_sudo_alert(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<SudoAlert>, ApiError> {
    let status = AlertStatus::parse(&req.status)?;
    Ok(Json(state.db.update_sudo_alert_status(id, status)?))
}
