pub mod bump;
pub mod restock;
pub mod status;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::core::marketplace::{MarketError, MarketplaceSession};

/// Delay after the session cookie stopped working. Effectively parks the
/// task until the user saves a fresh key.
pub const SESSION_LOST_BACKOFF: Duration = Duration::from_secs(999_999);
pub const NETWORK_BACKOFF: Duration = Duration::from_secs(600);
pub const CRASH_BACKOFF: Duration = Duration::from_secs(600);
pub const CONFIG_BACKOFF: Duration = Duration::from_secs(3600);
pub const DECRYPT_BACKOFF: Duration = Duration::from_secs(86_400);

pub const SESSION_LOST_STATUS: &str = "session lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Bump,
    Restock,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Bump => "autobump",
            EngineKind::Restock => "autorestock",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EngineKind::Bump => "autobump_tasks",
            EngineKind::Restock => "autorestock_tasks",
        }
    }

    /// Column holding the engine's target list.
    pub fn target_column(&self) -> &'static str {
        match self {
            EngineKind::Bump => "node_ids",
            EngineKind::Restock => "lots_json",
        }
    }

    /// Maximum stored length of `status_message`, in characters.
    pub fn status_limit(&self) -> usize {
        match self {
            EngineKind::Bump => 150,
            EngineKind::Restock => 100,
        }
    }

    /// Coarse gate on `last_run_at` applied on top of `next_run_at`.
    pub fn min_rerun_interval(&self) -> Option<Duration> {
        match self {
            EngineKind::Bump => None,
            EngineKind::Restock => Some(Duration::from_secs(2 * 3600)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one dispatch: what to show the user and when to come back.
/// `next_delay == None` leaves `next_run_at` untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: String,
    pub next_delay: Option<Duration>,
}

impl Outcome {
    pub fn new(status: impl Into<String>, next_delay: Duration) -> Self {
        Self {
            status: status.into(),
            next_delay: Some(next_delay),
        }
    }

    pub fn status_only(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            next_delay: None,
        }
    }

    pub fn session_lost() -> Self {
        Self::new(SESSION_LOST_STATUS, SESSION_LOST_BACKOFF)
    }

    pub fn decrypt_failed() -> Self {
        Self::new("❌ decrypt failed", DECRYPT_BACKOFF)
    }

    pub fn config_error(reason: &str) -> Self {
        Self::new(format!("⚠ {}", reason), CONFIG_BACKOFF)
    }

    pub fn crash(reason: &str) -> Self {
        Self::new(format!("crash: {}", reason), CRASH_BACKOFF)
    }

    pub fn from_market_error(err: &MarketError) -> Self {
        match err {
            MarketError::SessionLost => Self::session_lost(),
            other => Self::new(format!("❌ network error: {}", other), NETWORK_BACKOFF),
        }
    }
}

/// One automation engine. Engines never fail: every problem is folded
/// into the returned [`Outcome`].
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    type Target: Send + Sync + 'static;

    fn kind(&self) -> EngineKind;

    /// Decode the stored target column (node list or lot JSON).
    fn parse_target(&self, raw: &str) -> Result<Self::Target>;

    async fn dispatch(&self, session: &MarketplaceSession, target: &Self::Target) -> Outcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_their_tables_and_limits() {
        assert_eq!(EngineKind::Bump.table(), "autobump_tasks");
        assert_eq!(EngineKind::Restock.table(), "autorestock_tasks");
        assert_eq!(EngineKind::Bump.status_limit(), 150);
        assert_eq!(EngineKind::Restock.status_limit(), 100);
        assert_eq!(EngineKind::Bump.min_rerun_interval(), None);
        assert_eq!(
            EngineKind::Restock.min_rerun_interval(),
            Some(Duration::from_secs(7200))
        );
    }

    #[test]
    fn session_lost_parks_for_a_long_time() {
        let outcome = Outcome::from_market_error(&MarketError::SessionLost);
        assert_eq!(outcome.status, "session lost");
        assert!(outcome.next_delay.unwrap() >= Duration::from_secs(1_000_000 - 1));
    }

    #[test]
    fn failure_outcomes_carry_their_backoffs() {
        assert_eq!(
            Outcome::crash("boom").next_delay,
            Some(Duration::from_secs(600))
        );
        assert!(Outcome::crash("boom").status.starts_with("crash: "));
        assert_eq!(
            Outcome::config_error("no node ids configured").next_delay,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(Outcome::decrypt_failed().status, "❌ decrypt failed");
        assert_eq!(Outcome::status_only("checked").next_delay, None);
    }
}
