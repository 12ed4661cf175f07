use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};

use super::types::ApiTokenRecord;
use super::{TaskStore, to_rfc3339, unix_now};

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_raw_token() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("fpk_{}", hex::encode(bytes))
}

fn record(id: String, user_id: String, name: String, created_at: i64) -> ApiTokenRecord {
    ApiTokenRecord {
        id,
        user_id,
        name,
        created_at: to_rfc3339(created_at).unwrap_or_default(),
    }
}

impl TaskStore {
    /// Mint a bearer token for `user_id`. The raw token is returned once;
    /// only its hash is kept.
    pub async fn create_api_token(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<(String, ApiTokenRecord)> {
        let raw_token = generate_raw_token();
        let token_hash = hash_token(&raw_token);
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = unix_now();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO api_tokens (id, user_id, name, token_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, user_id, name, token_hash, created_at],
        )?;

        Ok((
            raw_token,
            record(id, user_id.to_string(), name.to_string(), created_at),
        ))
    }

    pub async fn list_api_tokens(&self, user_id: &str) -> Result<Vec<ApiTokenRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, name, created_at FROM api_tokens WHERE user_id = ?1 ORDER BY created_at DESC, id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(record(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }

    pub async fn delete_api_token(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute("DELETE FROM api_tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// The user a raw bearer token belongs to, if any.
    pub async fn resolve_api_token(&self, raw_token: &str) -> Result<Option<String>> {
        let token_hash = hash_token(raw_token);
        let db = self.db.lock().await;
        let user = db
            .query_row(
                "SELECT user_id FROM api_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user)
    }
}
