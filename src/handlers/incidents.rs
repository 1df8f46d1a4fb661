use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::AppState;
use crate::models::incident::IncidentSummary;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let limit = params.limit.min(500);
    let incidents: Vec<IncidentSummary> = state
        .store
        .list(limit, params.offset, Utc::now())
        .iter()
        .map(|i| i.summary())
        .collect();
    Json(serde_json::json!({
        "total": state.store.count(),
        "incidents": incidents,
    }))
}

pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let incident = state
        .store
        .get(&id, Utc::now())
        .ok_or_else(|| (StatusCode::NOT_FOUND, "incident not found".to_string()))?;
    Ok(Json(incident))
}
