//! Durable storage collaborator — user profile, VIP contacts, audit history.

mod libsql_backend;
mod migrations;

pub use libsql_backend::LibSqlBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::pipeline::context::Category;

// ── Profile ─────────────────────────────────────────────────────────

/// Per-user preferences consulted during draft generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Tone preference fed into the draft prompt.
    #[serde(default = "default_tone")]
    pub tone: String,
    /// Scheduling window suggested when meetings come up.
    #[serde(default = "default_meeting_hours")]
    pub preferred_meeting_hours: String,
    /// Addresses to CC on outbound replies.
    #[serde(default)]
    pub auto_cc: Vec<String>,
}

fn default_tone() -> String {
    "polite, concise, friendly".to_string()
}

fn default_meeting_hours() -> String {
    "Tue-Thu 09:00-11:30".to_string()
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            preferred_meeting_hours: default_meeting_hours(),
            auto_cc: Vec::new(),
        }
    }
}

// ── VIP contacts ────────────────────────────────────────────────────

/// A sender address flagged for elevated priority handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VipContact {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_vip_priority")]
    pub priority: u8,
    #[serde(default)]
    pub notes: String,
}

fn default_vip_priority() -> u8 {
    1
}

// ── Audit history ───────────────────────────────────────────────────

/// What happened to a message, for the append-only audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Triage,
    DraftGenerated,
    AwaitingApproval,
    Denied,
    Sent,
    SendFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::DraftGenerated => "draft_generated",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Denied => "denied",
            Self::Sent => "sent",
            Self::SendFailed => "send_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "triage" => Some(Self::Triage),
            "draft_generated" => Some(Self::DraftGenerated),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "denied" => Some(Self::Denied),
            "sent" => Some(Self::Sent),
            "send_failed" => Some(Self::SendFailed),
            _ => None,
        }
    }
}

/// One audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub user_id: String,
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub category: Category,
    pub action: AuditAction,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        user_id: impl Into<String>,
        message_id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        category: Category,
        action: AuditAction,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            message_id: message_id.into(),
            sender: sender.into(),
            subject: subject.into(),
            category,
            action,
            created_at: Utc::now(),
        }
    }
}

// ── Storage trait ───────────────────────────────────────────────────

/// Backend-agnostic storage covering profiles, VIP contacts, and the
/// audit history log.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Get a user's profile. Users without a stored profile get defaults.
    async fn get_profile(&self, user_id: &str) -> Result<UserProfile, DatabaseError>;

    /// Merge a JSON patch into a user's profile and return the result.
    async fn upsert_profile(
        &self,
        user_id: &str,
        patch: serde_json::Value,
    ) -> Result<UserProfile, DatabaseError>;

    /// Add or update a VIP contact.
    async fn add_vip(&self, user_id: &str, contact: &VipContact) -> Result<(), DatabaseError>;

    /// All VIP addresses for a user, highest priority first.
    async fn vip_addresses(&self, user_id: &str) -> Result<Vec<String>, DatabaseError>;

    /// Whether an address is a VIP contact for a user.
    async fn is_vip(&self, user_id: &str, address: &str) -> Result<bool, DatabaseError>;

    /// Append one audit record. Never updates existing rows.
    async fn append_history(&self, record: &HistoryRecord) -> Result<(), DatabaseError>;

    /// Most recent audit records for a user, newest first.
    async fn recent_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, DatabaseError>;
}
