pub mod autobump;
pub mod autorestock;
pub mod tokens;

use axum::Json;
use serde_json::Value;

use crate::core::vault::{CredentialVault, GoldenKey};

pub(crate) fn failure(message: impl Into<String>) -> Json<Value> {
    Json(serde_json::json!({ "success": false, "error": message.into() }))
}

/// Node ids arrive as numbers or numeric strings.
pub(crate) fn parse_node_list(raw: &[Value]) -> Result<Vec<u64>, String> {
    raw.iter()
        .map(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .map(|id| id.ok_or_else(|| "Node ids must be numeric".to_string()))
        .collect()
}

pub(crate) fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// Ciphertext to store for a task: a freshly sealed key when one was
/// supplied, otherwise the credential already on file.
pub(crate) fn resolve_credential(
    vault: &CredentialVault,
    golden_key: &str,
    stored: Option<String>,
) -> Result<String, String> {
    let golden_key = golden_key.trim();
    if !golden_key.is_empty() {
        return vault
            .seal_golden_key(&GoldenKey::new(golden_key))
            .map_err(|e| format!("Failed to encrypt golden key: {}", e));
    }
    stored.ok_or_else(|| "golden_key is required".to_string())
}
