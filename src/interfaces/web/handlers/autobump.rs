use axum::{Extension, Json, extract::State};
use serde_json::Value;
use tracing::info;

use super::{failure, parse_node_list, resolve_credential};
use crate::core::engine::EngineKind;
use crate::core::engine::bump::{format_node_ids, parse_node_ids};
use crate::core::store::{to_rfc3339, unix_now};
use crate::interfaces::web::{AppState, CallerId};

#[derive(serde::Deserialize)]
pub struct SetBumpRequest {
    #[serde(default)]
    pub golden_key: String,
    #[serde(default)]
    pub node_ids: Vec<Value>,
    #[serde(default)]
    pub active: bool,
}

pub async fn set_autobump(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Json(payload): Json<SetBumpRequest>,
) -> Json<Value> {
    let node_ids = match parse_node_list(&payload.node_ids) {
        Ok(ids) => ids,
        Err(e) => return failure(e),
    };
    if payload.active && node_ids.is_empty() {
        return failure("At least one node id is required");
    }

    let stored = match state.store.get_task(EngineKind::Bump, &user_id).await {
        Ok(task) => task.map(|t| t.encrypted_key),
        Err(e) => return failure(e.to_string()),
    };
    let encrypted = match resolve_credential(&state.vault, &payload.golden_key, stored) {
        Ok(c) => c,
        Err(e) => return failure(e),
    };

    match state
        .store
        .upsert_bump_task(
            &user_id,
            &encrypted,
            &format_node_ids(&node_ids),
            payload.active,
            unix_now(),
        )
        .await
    {
        Ok(()) => {
            info!(user_id = %user_id, nodes = node_ids.len(), active = payload.active, "autobump configured");
            Json(serde_json::json!({ "success": true, "message": "Autobump settings saved" }))
        }
        Err(e) => failure(e.to_string()),
    }
}

pub async fn force_check(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
) -> Json<Value> {
    match state
        .store
        .reset_schedule(EngineKind::Bump, &user_id, unix_now())
        .await
    {
        Ok(true) => Json(serde_json::json!({ "success": true, "message": "Check queued" })),
        Ok(false) => failure("Autobump is not configured"),
        Err(e) => failure(e.to_string()),
    }
}

pub async fn get_status(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
) -> Json<Value> {
    match state.store.get_task(EngineKind::Bump, &user_id).await {
        Ok(Some(task)) => {
            // A task with no schedule is due immediately.
            let next_bump = to_rfc3339(task.next_run_at.unwrap_or_else(unix_now));
            let node_ids = parse_node_ids(&task.target).unwrap_or_default();
            Json(serde_json::json!({
                "success": true,
                "configured": true,
                "is_active": task.is_active,
                "next_bump": next_bump,
                "last_run": task.last_run_at.and_then(to_rfc3339),
                "status_message": task.status_message,
                "node_ids": node_ids,
            }))
        }
        Ok(None) => Json(serde_json::json!({
            "success": true,
            "configured": false,
            "is_active": false,
            "next_bump": null,
            "last_run": null,
            "status_message": "",
            "node_ids": [],
        })),
        Err(e) => failure(e.to_string()),
    }
}

pub async fn disable(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
) -> Json<Value> {
    match state
        .store
        .set_active(EngineKind::Bump, &user_id, false)
        .await
    {
        Ok(true) => Json(serde_json::json!({ "success": true, "message": "Autobump disabled" })),
        Ok(false) => failure("Autobump is not configured"),
        Err(e) => failure(e.to_string()),
    }
}
