use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Engine, EngineKind, Outcome};
use crate::core::extract;
use crate::core::marketplace::{MarketError, MarketplaceSession};

/// Pause between two lots of the same user.
pub const LOT_DELAY: Duration = Duration::from_secs(2);

/// One offer whose stock is kept topped up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LotConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub node_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub offer_id: String,
    #[serde(default, alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub min_qty: u32,
    #[serde(default)]
    pub auto_enable: bool,
    #[serde(default)]
    pub secrets_pool: Vec<String>,
}

pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s.trim().to_string(),
        Id::Number(n) => n.to_string(),
    })
}

pub fn parse_lots(raw: &str) -> Result<Vec<LotConfig>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).context("lots_json is not a valid lot list")
}

/// Non-empty trimmed lines of a stock textarea.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stock the offer should hold after this pass.
///
/// When the first line on the server no longer matches the first pool
/// entry the user has switched products, so the old stock is dropped.
/// Missing lines are drawn from the pool in a cycle.
pub fn plan_stock(current: &[String], pool: &[String], min_qty: usize) -> Vec<String> {
    let mut lines = current.to_vec();
    if lines.first() != pool.first() {
        lines.clear();
    }
    if lines.len() < min_qty && !pool.is_empty() {
        let needed = min_qty - lines.len();
        lines.extend(pool.iter().cycle().take(needed).cloned());
    }
    lines
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LotResult {
    Updated { offer_id: String, qty: usize },
    Unchanged,
    EmptyPool,
    Skipped,
}

pub struct RestockEngine {
    lot_delay: Duration,
}

impl Default for RestockEngine {
    fn default() -> Self {
        Self::new(LOT_DELAY)
    }
}

impl RestockEngine {
    pub fn new(lot_delay: Duration) -> Self {
        Self { lot_delay }
    }

    async fn restock_lot(
        &self,
        session: &MarketplaceSession,
        lot: &LotConfig,
    ) -> Result<LotResult, MarketError> {
        if lot.secrets_pool.is_empty() {
            debug!(offer = %lot.offer_id, "empty secrets pool, skipping");
            return Ok(LotResult::EmptyPool);
        }
        if lot.min_qty == 0 {
            return Ok(LotResult::Skipped);
        }

        let page = session
            .get(&format!("/lots/offerEdit?offer={}", lot.offer_id))
            .await?;
        if page.status.is_server_error() {
            return Err(MarketError::Server(page.status));
        }
        if !page.is_success() {
            debug!(offer = %lot.offer_id, status = %page.status, "edit page unavailable");
            return Ok(LotResult::Skipped);
        }

        let form = extract::offer_form(&page.body);
        let Some(csrf) = form.csrf_token.as_deref() else {
            warn!(offer = %lot.offer_id, "no csrf token on edit page, skipping");
            return Ok(LotResult::Skipped);
        };

        let current = split_lines(form.secrets.as_deref().unwrap_or_default());
        let planned = plan_stock(&current, &lot.secrets_pool, lot.min_qty as usize);
        if planned == current {
            return Ok(LotResult::Unchanged);
        }

        let offer_id = form.offer_id.clone().unwrap_or_else(|| lot.offer_id.clone());
        let node_id = form.node_id.clone().unwrap_or_else(|| lot.node_id.clone());
        let secrets = planned.join("\n");
        let auto_delivery = if lot.auto_enable || form.auto_delivery {
            "on"
        } else {
            ""
        };
        let active = if form.active { "on" } else { "" };

        let reply = session
            .post_form(
                "/lots/offerSave",
                &page.url,
                &[
                    ("csrf_token", csrf),
                    ("offer_id", offer_id.as_str()),
                    ("node_id", node_id.as_str()),
                    ("secrets", secrets.as_str()),
                    ("auto_delivery", auto_delivery),
                    ("active", active),
                    ("save", "Сохранить"),
                ],
            )
            .await?;

        if reply.status == StatusCode::OK {
            Ok(LotResult::Updated {
                offer_id,
                qty: planned.len(),
            })
        } else {
            debug!(offer = %offer_id, status = %reply.status, "save not accepted");
            Ok(LotResult::Unchanged)
        }
    }
}

#[async_trait]
impl Engine for RestockEngine {
    type Target = Vec<LotConfig>;

    fn kind(&self) -> EngineKind {
        EngineKind::Restock
    }

    fn parse_target(&self, raw: &str) -> Result<Vec<LotConfig>> {
        parse_lots(raw)
    }

    async fn dispatch(&self, session: &MarketplaceSession, lots: &Vec<LotConfig>) -> Outcome {
        if lots.is_empty() {
            return Outcome::config_error("no lots configured");
        }

        let mut updated = Vec::new();
        let mut empty_pools = 0;
        for (index, lot) in lots.iter().enumerate() {
            if index > 0 && !self.lot_delay.is_zero() {
                tokio::time::sleep(self.lot_delay).await;
            }

            match self.restock_lot(session, lot).await {
                Ok(LotResult::Updated { offer_id, qty }) => {
                    info!(offer = %offer_id, qty, "stock topped up");
                    updated.push(format!("✅{}:{}", offer_id, qty));
                }
                Ok(LotResult::EmptyPool) => empty_pools += 1,
                Ok(LotResult::Unchanged) | Ok(LotResult::Skipped) => {}
                Err(MarketError::SessionLost) => return Outcome::session_lost(),
                Err(e) => warn!(offer = %lot.offer_id, "restock of lot failed: {}", e),
            }
        }

        if empty_pools == lots.len() {
            return Outcome::config_error("no keys in pool");
        }
        if updated.is_empty() {
            Outcome::status_only("checked")
        } else {
            Outcome::status_only(updated.join(", "))
        }
    }
}
