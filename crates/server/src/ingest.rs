//! Ingestion gateway: authenticated event batches from collectors, plus
//! agent registration and the liveness view.
//!
//! A batch is all-or-nothing: every event is validated into its typed
//! attribute set first, then the whole batch is appended in one
//! transaction. A single bad payload rejects the entire request.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use authwatch_core::event::DEFAULT_SEVERITY;
use authwatch_core::{AttrSet, CoreError, WireEvent};

use crate::db::{Agent, AgentInfo, StoredEvent};
use crate::error::ApiError;
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub agent_secret: String,
    pub events: Vec<WireEvent>,
}

#[derive(Debug, Serialize)]
pub struct BatchAck {
    pub status: &'static str,
    pub stored: usize,
}

pub async fn post_event_batch(
    State(state): State<SharedState>,
    Json(req): Json<BatchRequest>,
) -> Result<Json<BatchAck>, ApiError> {
    if req.agent_secret.is_empty() || req.events.is_empty() {
        return Err(
            CoreError::InvalidPayload("agent_secret and events are required".to_string()).into(),
        );
    }
    let (agent_id, _) = state.db.authenticate(&req.agent_secret)?;
    let now = Utc::now();

    let mut rows = Vec::with_capacity(req.events.len());
    for ev in &req.events {
        let attrs = AttrSet::validate(&ev.event_type, &ev.payload)?;
        rows.push(StoredEvent {
            ts: ev.ts.unwrap_or(now),
            source: ev.source.clone(),
            event_type: ev.event_type.clone(),
            severity: if ev.severity == 0 {
                DEFAULT_SEVERITY
            } else {
                ev.severity
            },
            payload: attrs.to_json()?,
        });
    }

    state.db.insert_event_batch(&agent_id, &rows)?;
    state.db.touch_agent(&agent_id, now)?;
    Ok(Json(BatchAck {
        status: "ok",
        stored: rows.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub hostname: String,
}

pub async fn register_agent(
    State(state): State<SharedState>,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<Json<Agent>, ApiError> {
    let hostname = req.hostname.trim();
    if hostname.is_empty() {
        return Err(CoreError::InvalidPayload("hostname is required".to_string()).into());
    }
    Ok(Json(state.db.register_agent(hostname)?))
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub generated_at: DateTime<Utc>,
    pub agents: Vec<AgentInfo>,
}

pub async fn list_agents(
    State(state): State<SharedState>,
) -> Result<Json<AgentsResponse>, ApiError> {
    Ok(Json(AgentsResponse {
        generated_at: Utc::now(),
        agents: state.db.list_agents()?,
    }))
}
