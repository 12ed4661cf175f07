use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

use super::TaskStore;
use super::types::TaskRow;
use crate::core::engine::status;
use crate::core::engine::{EngineKind, Outcome};

pub const PROCESSING_STATUS: &str = "⏳ processing";

fn select_columns(engine: EngineKind) -> String {
    format!(
        "SELECT user_id, encrypted_key, {}, is_active, next_run_at, last_run_at, status_message FROM {}",
        engine.target_column(),
        engine.table()
    )
}

fn read_task(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        user_id: row.get(0)?,
        encrypted_key: row.get(1)?,
        target: row.get(2)?,
        is_active: row.get::<_, i32>(3)? != 0,
        next_run_at: row.get(4)?,
        last_run_at: row.get(5)?,
        status_message: row.get(6)?,
    })
}

fn secs(d: std::time::Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

impl TaskStore {
    /// Active tasks whose `next_run_at` has passed (or was never set),
    /// oldest first. Restock tasks are additionally held back until
    /// their minimum rerun interval since `last_run_at` has elapsed.
    pub async fn claim(&self, engine: EngineKind, now: i64, limit: usize) -> Result<Vec<TaskRow>> {
        let rerun_cutoff = engine.min_rerun_interval().map(|d| now.saturating_sub(secs(d)));
        let sql = format!(
            "{} WHERE is_active = 1
               AND (next_run_at IS NULL OR next_run_at <= ?1)
               AND (?2 IS NULL OR last_run_at IS NULL OR last_run_at <= ?2)
             ORDER BY COALESCE(next_run_at, 0), user_id
             LIMIT ?3",
            select_columns(engine)
        );

        let db = self.db.lock().await;
        let mut stmt = db.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![now, rerun_cutoff, limit], read_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub async fn claim_one(&self, engine: EngineKind, now: i64) -> Result<Option<TaskRow>> {
        Ok(self.claim(engine, now, 1).await?.into_iter().next())
    }

    /// Stamp a task as running. With a reservation the task is also pushed
    /// out so a crash mid-dispatch cannot make it immediately claimable.
    pub async fn mark_dispatched(
        &self,
        engine: EngineKind,
        user_id: &str,
        now: i64,
        reservation: Option<std::time::Duration>,
    ) -> Result<()> {
        let reserved_until = reservation.map(|d| now.saturating_add(secs(d)));
        let db = self.db.lock().await;
        db.execute(
            &format!(
                "UPDATE {} SET last_run_at = ?1, status_message = ?2,
                    next_run_at = COALESCE(?3, next_run_at)
                 WHERE user_id = ?4",
                engine.table()
            ),
            params![now, PROCESSING_STATUS, reserved_until, user_id],
        )?;
        Ok(())
    }

    /// Persist a dispatch outcome. The status is sanitised to the engine's
    /// limit. Without an explicit delay, engines with a rerun interval
    /// are scheduled that far out so every dispatch moves the task forward.
    pub async fn record_outcome(
        &self,
        engine: EngineKind,
        user_id: &str,
        outcome: &Outcome,
        now: i64,
    ) -> Result<()> {
        let message = status::sanitize(&outcome.status, engine.status_limit());
        let next_run_at = outcome
            .next_delay
            .or_else(|| engine.min_rerun_interval())
            .map(|d| now.saturating_add(secs(d)));

        let db = self.db.lock().await;
        db.execute(
            &format!(
                "UPDATE {} SET status_message = ?1, next_run_at = COALESCE(?2, next_run_at)
                 WHERE user_id = ?3",
                engine.table()
            ),
            params![message, next_run_at, user_id],
        )?;
        Ok(())
    }

    /// Create or replace a user's bump task and make it due immediately.
    pub async fn upsert_bump_task(
        &self,
        user_id: &str,
        encrypted_key: &str,
        node_ids: &str,
        active: bool,
        now: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO autobump_tasks (user_id, encrypted_key, node_ids, is_active, next_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                encrypted_key = excluded.encrypted_key,
                node_ids = excluded.node_ids,
                is_active = excluded.is_active,
                next_run_at = excluded.next_run_at",
            params![user_id, encrypted_key, node_ids, active as i32, now],
        )?;
        Ok(())
    }

    /// Create or replace a user's restock task. `last_run_at` is cleared
    /// so the new lots are picked up on the next pass.
    pub async fn upsert_restock_task(
        &self,
        user_id: &str,
        encrypted_key: &str,
        lots_json: &str,
        active: bool,
        now: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO autorestock_tasks (user_id, encrypted_key, lots_json, is_active, next_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                encrypted_key = excluded.encrypted_key,
                lots_json = excluded.lots_json,
                is_active = excluded.is_active,
                next_run_at = excluded.next_run_at,
                last_run_at = NULL",
            params![user_id, encrypted_key, lots_json, active as i32, now],
        )?;
        Ok(())
    }

    /// Make a task due now. Returns false when the user has no task.
    pub async fn reset_schedule(&self, engine: EngineKind, user_id: &str, now: i64) -> Result<bool> {
        let clear_last_run = if engine.min_rerun_interval().is_some() {
            ", last_run_at = NULL"
        } else {
            ""
        };
        let db = self.db.lock().await;
        let rows = db.execute(
            &format!(
                "UPDATE {} SET next_run_at = ?1{} WHERE user_id = ?2",
                engine.table(),
                clear_last_run
            ),
            params![now, user_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn get_task(&self, engine: EngineKind, user_id: &str) -> Result<Option<TaskRow>> {
        let db = self.db.lock().await;
        let task = db
            .query_row(
                &format!("{} WHERE user_id = ?1", select_columns(engine)),
                params![user_id],
                read_task,
            )
            .optional()?;
        Ok(task)
    }

    pub async fn set_active(&self, engine: EngineKind, user_id: &str, active: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            &format!("UPDATE {} SET is_active = ?1 WHERE user_id = ?2", engine.table()),
            params![active as i32, user_id],
        )?;
        Ok(rows > 0)
    }
}
