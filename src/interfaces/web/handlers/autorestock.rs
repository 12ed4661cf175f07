use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

use super::{failure, is_numeric_id, parse_node_list, resolve_credential};
use crate::core::engine::EngineKind;
use crate::core::engine::restock::{LotConfig, parse_lots, string_or_number};
use crate::core::extract;
use crate::core::marketplace::{MarketError, MarketplaceSession};
use crate::core::store::{to_rfc3339, unix_now};
use crate::core::vault::GoldenKey;
use crate::interfaces::web::{AppState, CallerId};

#[derive(Deserialize)]
pub struct FetchOffersRequest {
    #[serde(default)]
    pub golden_key: String,
    #[serde(default)]
    pub node_ids: Vec<Value>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OfferSummary {
    pub node_id: String,
    pub offer_id: String,
    pub name: String,
    pub valid: bool,
}

#[derive(Deserialize)]
pub struct LotInput {
    #[serde(deserialize_with = "string_or_number")]
    pub node_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub offer_id: String,
    #[serde(default, alias = "display_name")]
    pub name: String,
    #[serde(default)]
    pub min_qty: u32,
    #[serde(default)]
    pub auto_enable: bool,
    #[serde(default)]
    pub add_secrets: Vec<String>,
}

#[derive(Deserialize)]
pub struct SetRestockRequest {
    #[serde(default)]
    pub golden_key: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub lots: Vec<LotInput>,
}

/// Build the new lot list. Pools of offers already configured are kept
/// and extended; offers missing from `inputs` are dropped.
pub(crate) fn merge_lots(
    existing: Vec<LotConfig>,
    inputs: Vec<LotInput>,
) -> Result<Vec<LotConfig>, String> {
    let mut seen = HashSet::new();
    let mut lots = Vec::with_capacity(inputs.len());

    for input in inputs {
        if !is_numeric_id(&input.node_id) || !is_numeric_id(&input.offer_id) {
            return Err("Lot node_id and offer_id must be numeric".to_string());
        }
        if !seen.insert(input.offer_id.clone()) {
            return Err(format!("Offer {} is listed twice", input.offer_id));
        }

        let mut secrets_pool = existing
            .iter()
            .find(|lot| lot.offer_id == input.offer_id)
            .map(|lot| lot.secrets_pool.clone())
            .unwrap_or_default();
        secrets_pool.extend(
            input
                .add_secrets
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );

        lots.push(LotConfig {
            node_id: input.node_id,
            offer_id: input.offer_id,
            display_name: input.name.trim().to_string(),
            min_qty: input.min_qty,
            auto_enable: input.auto_enable,
            secrets_pool,
        });
    }
    Ok(lots)
}

async fn scrape_offers(
    session: &MarketplaceSession,
    node_ids: &[u64],
) -> Result<Vec<OfferSummary>, MarketError> {
    let mut offers = Vec::new();
    for node in node_ids {
        let listing = session.get(&format!("/lots/{}/trade", node)).await?;
        if !listing.is_success() {
            debug!(node, status = %listing.status, "listing unavailable");
            continue;
        }

        for offer_id in extract::offer_links(&listing.body) {
            let page = session
                .get(&format!("/lots/offerEdit?node={}&offer={}", node, offer_id))
                .await?;
            let name = if page.is_success() {
                extract::offer_name(&page.body)
            } else {
                None
            };
            offers.push(OfferSummary {
                node_id: node.to_string(),
                offer_id,
                valid: name.is_some(),
                name: name.unwrap_or_default(),
            });
        }
    }
    Ok(offers)
}

/// The key to scrape with: the one in the request, else the restock
/// credential on file, else the bump one.
async fn golden_key_for(state: &AppState, user_id: &str, supplied: &str) -> Result<GoldenKey, String> {
    let supplied = supplied.trim();
    if !supplied.is_empty() {
        return Ok(GoldenKey::new(supplied));
    }
    for engine in [EngineKind::Restock, EngineKind::Bump] {
        if let Ok(Some(task)) = state.store.get_task(engine, user_id).await {
            return state
                .vault
                .open_golden_key(&task.encrypted_key)
                .map_err(|_| "Stored golden key cannot be decrypted".to_string());
        }
    }
    Err("golden_key is required".to_string())
}

pub async fn fetch_offers(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Json(payload): Json<FetchOffersRequest>,
) -> Json<Value> {
    let node_ids = match parse_node_list(&payload.node_ids) {
        Ok(ids) if !ids.is_empty() => ids,
        Ok(_) => return failure("At least one node id is required"),
        Err(e) => return failure(e),
    };
    let key = match golden_key_for(&state, &user_id, &payload.golden_key).await {
        Ok(key) => key,
        Err(e) => return failure(e),
    };
    let session = match MarketplaceSession::open(&key, &state.marketplace) {
        Ok(s) => s,
        Err(e) => return failure(key.redact(&e.to_string())),
    };

    match scrape_offers(&session, &node_ids).await {
        Ok(offers) => Json(serde_json::json!({ "success": true, "offers": offers })),
        Err(MarketError::SessionLost) => {
            failure("Session lost: the golden key is no longer valid")
        }
        Err(e) => failure(key.redact(&format!("Marketplace request failed: {}", e))),
    }
}

pub async fn set_autorestock(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
    Json(payload): Json<SetRestockRequest>,
) -> Json<Value> {
    if payload.active && payload.lots.is_empty() {
        return failure("At least one lot is required");
    }

    let stored = match state.store.get_task(EngineKind::Restock, &user_id).await {
        Ok(task) => task,
        Err(e) => return failure(e.to_string()),
    };
    let existing = stored
        .as_ref()
        .and_then(|t| parse_lots(&t.target).ok())
        .unwrap_or_default();
    let encrypted = match resolve_credential(
        &state.vault,
        &payload.golden_key,
        stored.map(|t| t.encrypted_key),
    ) {
        Ok(c) => c,
        Err(e) => return failure(e),
    };

    let lots = match merge_lots(existing, payload.lots) {
        Ok(lots) => lots,
        Err(e) => return failure(e),
    };
    let lots_json = match serde_json::to_string(&lots) {
        Ok(json) => json,
        Err(e) => return failure(e.to_string()),
    };

    match state
        .store
        .upsert_restock_task(&user_id, &encrypted, &lots_json, payload.active, unix_now())
        .await
    {
        Ok(()) => {
            info!(user_id = %user_id, lots = lots.len(), active = payload.active, "autorestock configured");
            Json(serde_json::json!({
                "success": true,
                "message": "Autorestock settings saved",
                "lots": lots.len(),
            }))
        }
        Err(e) => failure(e.to_string()),
    }
}

pub async fn get_status(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
) -> Json<Value> {
    let task = match state.store.get_task(EngineKind::Restock, &user_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            return Json(serde_json::json!({
                "success": true,
                "configured": false,
                "is_active": false,
                "last_run": null,
                "next_check": null,
                "status_message": "",
                "lots": [],
            }));
        }
        Err(e) => return failure(e.to_string()),
    };

    let interval = EngineKind::Restock
        .min_rerun_interval()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let next_check = task
        .next_run_at
        .unwrap_or_else(unix_now)
        .max(task.last_run_at.map(|t| t + interval).unwrap_or(0));

    // Key counts only; pool contents never leave the store.
    let lots: Vec<Value> = parse_lots(&task.target)
        .unwrap_or_default()
        .iter()
        .map(|lot| {
            serde_json::json!({
                "node_id": lot.node_id,
                "offer_id": lot.offer_id,
                "name": lot.display_name,
                "min_qty": lot.min_qty,
                "auto_enable": lot.auto_enable,
                "keys": lot.secrets_pool.len(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "success": true,
        "configured": true,
        "is_active": task.is_active,
        "last_run": task.last_run_at.and_then(to_rfc3339),
        "next_check": to_rfc3339(next_check),
        "status_message": task.status_message,
        "lots": lots,
    }))
}

pub async fn disable(
    State(state): State<AppState>,
    Extension(CallerId(user_id)): Extension<CallerId>,
) -> Json<Value> {
    match state
        .store
        .set_active(EngineKind::Restock, &user_id, false)
        .await
    {
        Ok(true) => Json(serde_json::json!({ "success": true, "message": "Autorestock disabled" })),
        Ok(false) => failure("Autorestock is not configured"),
        Err(e) => failure(e.to_string()),
    }
}
