//! libSQL backend — async `Storage` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::context::Category;
use crate::store::migrations;
use crate::store::{AuditAction, HistoryRecord, Storage, UserProfile, VipContact};

/// libSQL storage backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_history(row: &libsql::Row) -> Result<HistoryRecord, libsql::Error> {
    let user_id: String = row.get(0)?;
    let message_id: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let subject: String = row.get(3)?;
    let category_str: String = row.get(4)?;
    let action_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(HistoryRecord {
        user_id,
        message_id,
        sender,
        subject,
        category: Category::parse(&category_str).unwrap_or(Category::Fyi),
        action: AuditAction::parse(&action_str).unwrap_or(AuditAction::Triage),
        created_at: parse_datetime(&created_str),
    })
}

const HISTORY_COLUMNS: &str = "user_id, message_id, sender, subject, category, action, created_at";

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Storage for LibSqlBackend {
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT data FROM profile WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let data: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_profile row: {e}")))?;
                // A corrupted blob falls back to defaults rather than failing the caller
                Ok(serde_json::from_str(&data).unwrap_or_default())
            }
            Ok(None) => Ok(UserProfile::default()),
            Err(e) => Err(DatabaseError::Query(format!("get_profile: {e}"))),
        }
    }

    async fn upsert_profile(
        &self,
        user_id: &str,
        patch: serde_json::Value,
    ) -> Result<UserProfile, DatabaseError> {
        let current = self.get_profile(user_id).await?;
        let mut merged = serde_json::to_value(&current)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        if let (Some(obj), Some(patch_obj)) = (merged.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_obj {
                obj.insert(key.clone(), value.clone());
            }
        }

        let profile: UserProfile = serde_json::from_value(merged)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let data = serde_json::to_string(&profile)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT INTO profile (user_id, data, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(user_id) DO UPDATE SET data = ?2, updated_at = datetime('now')",
                params![user_id, data],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_profile: {e}")))?;

        debug!(user_id = user_id, "Profile updated");
        Ok(profile)
    }

    async fn add_vip(&self, user_id: &str, contact: &VipContact) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO vip_contacts (user_id, email, name, priority, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, email) DO UPDATE SET
                     name = ?3, priority = ?4, notes = ?5",
                params![
                    user_id,
                    contact.email.to_lowercase(),
                    contact.name.clone(),
                    i64::from(contact.priority),
                    contact.notes.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_vip: {e}")))?;

        debug!(user_id = user_id, email = %contact.email, "VIP contact upserted");
        Ok(())
    }

    async fn vip_addresses(&self, user_id: &str) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT email FROM vip_contacts WHERE user_id = ?1
                 ORDER BY priority DESC, name",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("vip_addresses: {e}")))?;

        let mut addresses = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let email: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("vip_addresses row: {e}")))?;
            addresses.push(email);
        }
        Ok(addresses)
    }

    async fn is_vip(&self, user_id: &str, address: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM vip_contacts WHERE user_id = ?1 AND email = LOWER(?2)",
                params![user_id, address],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_vip: {e}")))?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_vip: {e}"))),
        }
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO email_history ({HISTORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    record.user_id.clone(),
                    record.message_id.clone(),
                    record.sender.clone(),
                    record.subject.clone(),
                    record.category.as_str(),
                    record.action.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_history: {e}")))?;

        debug!(
            message_id = %record.message_id,
            action = record.action.as_str(),
            "Audit record appended"
        );
        Ok(())
    }

    async fn recent_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM email_history
                     WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_history: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let record = row_to_history(&row)
                .map_err(|e| DatabaseError::Query(format!("recent_history row: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }
}
