use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Engine, EngineKind, Outcome};
use crate::core::extract;
use crate::core::marketplace::{MarketError, MarketplaceSession, Page};

pub const BUMP_SUCCESS_DELAY: Duration = Duration::from_secs(4 * 3600);
pub const NO_ACTION_DELAY: Duration = Duration::from_secs(3600);
/// Added to every advertised cooldown; retrying right at the boundary fails.
pub const COOLDOWN_MARGIN_SECS: u64 = 120;

/// Raises every configured category page of one user.
#[derive(Debug, Default, Clone, Copy)]
pub struct BumpEngine;

/// Node ids are stored comma-separated.
pub fn parse_node_ids(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .with_context(|| format!("node id '{}' is not numeric", s))
        })
        .collect()
}

pub fn format_node_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeResult {
    Raised,
    Cooldown { wait_secs: u64, message: String },
    Skipped,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        Value::Null => false,
        _ => true,
    }
}

/// Classify the body returned by `/lots/raise`.
pub fn interpret_raise_reply(body: &str) -> NodeResult {
    if let Ok(Value::Object(reply)) = serde_json::from_str::<Value>(body) {
        let failed = reply.get("error").is_some_and(is_truthy);
        if !failed {
            return NodeResult::Raised;
        }
        let message = reply
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        return match extract::cooldown_seconds(message) {
            Some(wait_secs) => NodeResult::Cooldown {
                wait_secs,
                message: message.to_string(),
            },
            None => NodeResult::Skipped,
        };
    }

    if body.to_lowercase().contains("поднято") {
        NodeResult::Raised
    } else {
        NodeResult::Skipped
    }
}

#[derive(Debug, Default)]
struct Tally {
    raised: usize,
    max_wait_secs: u64,
    wait_message: String,
}

impl Tally {
    fn record(&mut self, result: NodeResult) {
        match result {
            NodeResult::Raised => self.raised += 1,
            NodeResult::Cooldown { wait_secs, message } => {
                if wait_secs > self.max_wait_secs {
                    self.max_wait_secs = wait_secs;
                    self.wait_message = message;
                }
            }
            NodeResult::Skipped => {}
        }
    }

    fn into_outcome(self) -> Outcome {
        if self.max_wait_secs > 0 {
            Outcome::new(
                format!("⏳ {}", self.wait_message),
                Duration::from_secs(self.max_wait_secs.saturating_add(COOLDOWN_MARGIN_SECS)),
            )
        } else if self.raised > 0 {
            Outcome::new(format!("✅ Bumped: {}", self.raised), BUMP_SUCCESS_DELAY)
        } else {
            Outcome::new("⚠ no action", NO_ACTION_DELAY)
        }
    }
}

fn check_server(page: &Page) -> Result<(), MarketError> {
    if page.status.is_server_error() {
        return Err(MarketError::Server(page.status));
    }
    Ok(())
}

async fn raise_node(session: &MarketplaceSession, node: u64) -> Result<NodeResult, MarketError> {
    let page = session.get(&format!("/lots/{}/trade", node)).await?;
    if page.status == StatusCode::NOT_FOUND {
        debug!(node, "listing page not found, skipping");
        return Ok(NodeResult::Skipped);
    }
    check_server(&page)?;
    if !page.is_success() {
        debug!(node, status = %page.status, "listing page unavailable, skipping");
        return Ok(NodeResult::Skipped);
    }

    let csrf = extract::csrf_token(&page.body);
    let Some(game) = extract::game_id(&page.body) else {
        if extract::contains_wait_sentinel(&page.body) {
            return Ok(NodeResult::Cooldown {
                wait_secs: extract::SENTINEL_COOLDOWN_SECS,
                message: extract::WAIT_SENTINEL.to_string(),
            });
        }
        debug!(node, "no game id on listing page, skipping");
        return Ok(NodeResult::Skipped);
    };

    let node_id = node.to_string();
    let mut form = vec![("game_id", game.as_str()), ("node_id", node_id.as_str())];
    // The raise endpoint sometimes accepts the call without a token.
    if let Some(token) = csrf.as_deref() {
        form.push(("csrf_token", token));
    }

    let reply = session.post_form("/lots/raise", &page.url, &form).await?;
    check_server(&reply)?;
    Ok(interpret_raise_reply(&reply.body))
}

#[async_trait]
impl Engine for BumpEngine {
    type Target = Vec<u64>;

    fn kind(&self) -> EngineKind {
        EngineKind::Bump
    }

    fn parse_target(&self, raw: &str) -> Result<Vec<u64>> {
        parse_node_ids(raw)
    }

    async fn dispatch(&self, session: &MarketplaceSession, nodes: &Vec<u64>) -> Outcome {
        if nodes.is_empty() {
            return Outcome::config_error("no node ids configured");
        }

        let mut tally = Tally::default();
        for &node in nodes {
            match raise_node(session, node).await {
                Ok(result) => {
                    debug!(node, ?result, "node processed");
                    tally.record(result);
                }
                Err(e) => {
                    warn!(node, "bump aborted: {}", e);
                    return Outcome::from_market_error(&e);
                }
            }
        }

        info!(
            raised = tally.raised,
            max_wait = tally.max_wait_secs,
            "bump pass complete"
        );
        tally.into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketplaceSettings;
    use crate::core::vault::GoldenKey;
    use crate::test_support::{MockMarketplace, MockState, trade_page};
    use url::Url;

    fn session_for(mock: &MockMarketplace) -> MarketplaceSession {
        let settings = MarketplaceSettings::new(mock.base_url.clone());
        MarketplaceSession::open(&GoldenKey::new("gk-test"), &settings).unwrap()
    }

    fn state_with_nodes(nodes: &[(&str, &str)]) -> MockState {
        let mut state = MockState::default();
        for (node, reply) in nodes {
            state
                .trade_pages
                .insert(node.to_string(), trade_page("41", node, &[]));
            state
                .raise_responses
                .insert(node.to_string(), reply.to_string());
        }
        state
    }

    async fn run(state: MockState, nodes: Vec<u64>) -> (Outcome, MockMarketplace) {
        let mock = MockMarketplace::start(state).await;
        let session = session_for(&mock);
        let outcome = BumpEngine.dispatch(&session, &nodes).await;
        (outcome, mock)
    }

    #[test]
    fn node_ids_parse_from_comma_list() {
        assert_eq!(parse_node_ids("1, 2,,3 ").unwrap(), vec![1, 2, 3]);
        assert!(parse_node_ids("").unwrap().is_empty());
        assert!(parse_node_ids("1,abc").is_err());
        assert_eq!(format_node_ids(&[5, 6]), "5,6");
    }

    #[test]
    fn raise_replies_are_classified() {
        assert_eq!(interpret_raise_reply(r#"{"error":false}"#), NodeResult::Raised);
        assert_eq!(interpret_raise_reply(r#"{"error":0,"msg":"ok"}"#), NodeResult::Raised);
        assert_eq!(
            interpret_raise_reply(r#"{"error":true,"msg":"Подождите 2ч."}"#),
            NodeResult::Cooldown {
                wait_secs: 7200,
                message: "Подождите 2ч.".to_string()
            }
        );
        assert_eq!(
            interpret_raise_reply(r#"{"error":1,"msg":"Неизвестная ошибка"}"#),
            NodeResult::Skipped
        );
        assert_eq!(
            interpret_raise_reply("<div>Предложение ПОДНЯТО</div>"),
            NodeResult::Raised
        );
        assert_eq!(interpret_raise_reply("<html>?</html>"), NodeResult::Skipped);
    }

    #[tokio::test]
    async fn single_success_bumps_for_four_hours() {
        let (outcome, mock) = run(state_with_nodes(&[("100", r#"{"error":false}"#)]), vec![100]).await;
        assert!(outcome.status.starts_with("✅ Bumped: 1"));
        assert_eq!(outcome.next_delay, Some(Duration::from_secs(14_400)));

        let posts = mock.posts_to("/lots/raise");
        assert_eq!(posts.len(), 1);
        let form = &posts[0].form;
        assert_eq!(form.get("game_id").map(String::as_str), Some("41"));
        assert_eq!(form.get("node_id").map(String::as_str), Some("100"));
        assert_eq!(form.get("csrf_token").map(String::as_str), Some("csrf-100"));
        let referer = posts[0].referer.clone().unwrap();
        assert!(referer.ends_with("/lots/100/trade"));
    }

    #[tokio::test]
    async fn advertised_cooldown_is_padded() {
        let (outcome, _) = run(
            state_with_nodes(&[("100", r#"{"error":true,"msg":"Подождите 1ч 30м"}"#)]),
            vec![100],
        )
        .await;
        assert!(outcome.status.starts_with('⏳'));
        assert!(outcome.status.contains("Подождите 1ч 30м"));
        assert_eq!(outcome.next_delay, Some(Duration::from_secs(5520)));
    }

    #[tokio::test]
    async fn absurd_cooldown_is_capped() {
        let (outcome, _) = run(
            state_with_nodes(&[("100", r#"{"error":true,"msg":"Подождите 3000000000000000ч"}"#)]),
            vec![100],
        )
        .await;
        assert_eq!(
            outcome.next_delay,
            Some(Duration::from_secs(
                extract::MAX_COOLDOWN_SECS + COOLDOWN_MARGIN_SECS
            ))
        );
    }

    #[tokio::test]
    async fn longest_cooldown_wins_over_successes() {
        let state = state_with_nodes(&[
            ("1", r#"{"error":false}"#),
            ("2", r#"{"error":true,"msg":"Подождите 20м"}"#),
            ("3", r#"{"error":true,"msg":"Подождите 3ч"}"#),
            ("4", r#"{"error":true,"msg":"Подождите 1ч"}"#),
        ]);
        let (outcome, _) = run(state, vec![1, 2, 3, 4]).await;
        assert_eq!(outcome.status, "⏳ Подождите 3ч");
        assert_eq!(
            outcome.next_delay,
            Some(Duration::from_secs(3 * 3600 + COOLDOWN_MARGIN_SECS))
        );
    }

    #[tokio::test]
    async fn counts_every_raised_node() {
        let state = state_with_nodes(&[
            ("1", r#"{"error":false}"#),
            ("2", "<p>Предложения подняты. Поднято!</p>"),
        ]);
        let (outcome, _) = run(state, vec![1, 2, 404]).await;
        assert_eq!(outcome.status, "✅ Bumped: 2");
    }

    #[tokio::test]
    async fn login_redirect_parks_the_task() {
        let state = MockState {
            login_redirect: true,
            ..state_with_nodes(&[("100", r#"{"error":false}"#)])
        };
        let (outcome, mock) = run(state, vec![100]).await;
        assert_eq!(outcome.status, "session lost");
        assert!(outcome.next_delay.unwrap() >= Duration::from_secs(999_999));
        assert!(mock.posts_to("/lots/raise").is_empty());
    }

    #[tokio::test]
    async fn missing_pages_mean_no_action() {
        let (outcome, mock) = run(MockState::default(), vec![7, 8]).await;
        assert_eq!(outcome.status, "⚠ no action");
        assert_eq!(outcome.next_delay, Some(Duration::from_secs(3600)));
        assert!(mock.posts_to("/lots/raise").is_empty());
    }

    #[tokio::test]
    async fn wait_sentinel_without_game_is_an_hour_cooldown() {
        let mut state = MockState::default();
        state.trade_pages.insert(
            "9".to_string(),
            "<html><body>Подождите немного</body></html>".to_string(),
        );
        let (outcome, mock) = run(state, vec![9]).await;
        assert!(outcome.status.starts_with('⏳'));
        assert_eq!(outcome.next_delay, Some(Duration::from_secs(3720)));
        assert!(mock.posts_to("/lots/raise").is_empty());
    }

    #[tokio::test]
    async fn page_without_csrf_still_posts() {
        let mut state = MockState::default();
        state.trade_pages.insert(
            "5".to_string(),
            r#"<html><button class="js-lot-raise" data-game="12"></button></html>"#.to_string(),
        );
        let (outcome, mock) = run(state, vec![5]).await;
        assert_eq!(outcome.status, "✅ Bumped: 1");
        let posts = mock.posts_to("/lots/raise");
        assert!(!posts[0].form.contains_key("csrf_token"));
    }

    #[tokio::test]
    async fn empty_node_list_is_a_configuration_error() {
        let (outcome, _) = run(MockState::default(), vec![]).await;
        assert!(outcome.status.starts_with('⚠'));
        assert_eq!(outcome.next_delay, Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn transport_failure_backs_off_ten_minutes() {
        let settings = MarketplaceSettings::new(Url::parse("http://127.0.0.1:1").unwrap());
        let session = MarketplaceSession::open(&GoldenKey::new("gk-test"), &settings).unwrap();
        let outcome = BumpEngine.dispatch(&session, &vec![1]).await;
        assert!(outcome.status.starts_with("❌ network error"));
        assert!(!outcome.status.contains("gk-test"));
        assert_eq!(outcome.next_delay, Some(Duration::from_secs(600)));
    }
}
