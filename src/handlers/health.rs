use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "incidents_tracked": state.store.count(),
        "dedup_hits": state.store.dedup_hits(),
    }))
}
