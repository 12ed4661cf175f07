use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::Value;

use super::failure;
use crate::interfaces::web::{AppState, CallerId};

#[derive(serde::Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
) -> Json<Value> {
    match state.store.list_api_tokens(&user_id).await {
        Ok(tokens) => Json(serde_json::json!({ "success": true, "tokens": tokens })),
        Err(e) => failure(e.to_string()),
    }
}

pub async fn create_token(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Json(payload): Json<CreateTokenRequest>,
) -> Json<Value> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return failure("Token name is required");
    }

    match state.store.create_api_token(&user_id, &name).await {
        Ok((raw_token, record)) => Json(serde_json::json!({
            "success": true,
            "token": raw_token,
            "record": record,
            "message": "Token created. Save the token value - it will not be shown again."
        })),
        Err(e) => failure(e.to_string()),
    }
}

/// Revoke one of the caller's own tokens.
pub async fn delete_token(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Path(token_id): Path<String>,
) -> Json<Value> {
    let owned = match state.store.list_api_tokens(&user_id).await {
        Ok(tokens) => tokens.iter().any(|t| t.id == token_id),
        Err(e) => return failure(e.to_string()),
    };
    if !owned {
        return failure("Token not found");
    }

    match state.store.delete_api_token(&token_id).await {
        Ok(true) => Json(serde_json::json!({ "success": true, "message": "Token revoked" })),
        Ok(false) => failure("Token not found"),
        Err(e) => failure(e.to_string()),
    }
}
