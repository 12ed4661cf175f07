mod tasks;
mod tokens;
pub mod types;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::engine::EngineKind;
use crate::core::lifecycle::LifecycleComponent;

pub use types::TaskRow;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS autobump_tasks (
    user_id TEXT PRIMARY KEY,
    encrypted_key TEXT NOT NULL,
    node_ids TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 0,
    next_run_at INTEGER,
    last_run_at INTEGER,
    status_message TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS autorestock_tasks (
    user_id TEXT PRIMARY KEY,
    encrypted_key TEXT NOT NULL,
    lots_json TEXT NOT NULL DEFAULT '[]',
    is_active INTEGER NOT NULL DEFAULT 0,
    next_run_at INTEGER,
    last_run_at INTEGER,
    status_message TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS api_tokens (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_autobump_ready ON autobump_tasks(is_active, next_run_at);
CREATE INDEX IF NOT EXISTS idx_autorestock_ready ON autorestock_tasks(is_active, next_run_at);
CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id);
";

/// Persistent queue of per-user automation tasks plus API tokens.
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct TaskStore {
    db: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (or create) the database at `path`. `:memory:` is accepted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let db = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        Self::init(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch(SCHEMA)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub async fn count_active(&self, engine: EngineKind) -> Result<i64> {
        let db = self.db.lock().await;
        let count = db.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE is_active = 1", engine.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Render a stored Unix timestamp for API responses.
pub fn to_rfc3339(ts: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|t| t.to_rfc3339())
}

#[async_trait]
impl LifecycleComponent for TaskStore {
    async fn on_init(&mut self) -> Result<()> {
        let bump = self.count_active(EngineKind::Bump).await?;
        let restock = self.count_active(EngineKind::Restock).await?;
        info!(
            "Task store ready ({} active bump tasks, {} active restock tasks)",
            bump, restock
        );
        Ok(())
    }
}
