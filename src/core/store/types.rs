/// One automation task row, for either engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub user_id: String,
    pub encrypted_key: String,
    /// Comma-separated node ids (bump) or lot JSON (restock).
    pub target: String,
    pub is_active: bool,
    pub next_run_at: Option<i64>,
    pub last_run_at: Option<i64>,
    pub status_message: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiTokenRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: String,
}
