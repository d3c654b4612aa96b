//! Shared types for the triage pipeline.

use serde::{Deserialize, Serialize};

// ── Category ────────────────────────────────────────────────────────

/// Closed classification of an inbound email.
///
/// Raw model output is normalized into this enum exactly once, at the
/// inference adapter boundary — the rest of the core never sees untyped
/// label strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Requires a response or action from the recipient.
    NeedsReply,
    /// Meeting requests, invitations, scheduling.
    Schedule,
    /// Informational, no action required.
    Fyi,
    /// Unsolicited, promotional, or suspicious.
    Spam,
}

impl Category {
    /// DB/audit label for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsReply => "needs_reply",
            Self::Schedule => "schedule",
            Self::Fyi => "fyi",
            Self::Spam => "spam",
        }
    }

    /// Parse a label string. Unknown labels are `None` — the caller decides
    /// the safe default.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "needs_reply" => Some(Self::NeedsReply),
            "schedule" => Some(Self::Schedule),
            "fyi" => Some(Self::Fyi),
            "spam" => Some(Self::Spam),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Proposed action ─────────────────────────────────────────────────

/// Action the pipeline proposes for an email. Only `SendMessage` is
/// side-effecting and therefore gated behind human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposedAction {
    SendMessage,
    CreateEvent,
    None,
}

impl ProposedAction {
    /// Derive the proposed action from a classification.
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::NeedsReply => Self::SendMessage,
            Category::Schedule => Self::CreateEvent,
            Category::Fyi | Category::Spam => Self::None,
        }
    }
}

// ── Decision ────────────────────────────────────────────────────────

/// Field-level edits a human may apply to a proposal before it is sent.
/// Absent fields fall back to the stored proposal values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalEdits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A human (or automated) ruling on a suspended proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edits: Option<ProposalEdits>,
}

// ── Submission & context ────────────────────────────────────────────

/// An inbound email submitted to the pipeline, either by the ambient poll
/// loop or directly via `POST /submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSubmission {
    pub user_id: String,
    pub message_id: String,
    pub subject: String,
    pub body: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// The unit of work flowing through the pipeline.
///
/// Exclusively owned by one in-flight run; mutated in place by each stage
/// and discarded once a terminal state is reached. Only audit records
/// outlive the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContext {
    pub user_id: String,
    pub message_id: String,
    pub subject: String,
    pub body: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Set by the Classify stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub is_vip: bool,
    /// 1 = normal, 2 = VIP.
    pub priority: u8,
    pub proposed_action: ProposedAction,
    /// Set iff `category == NeedsReply`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    /// Accumulated rulings, append-only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<Decision>,
}

impl MessageContext {
    /// Build a fresh context from a submission. Triage fields start at
    /// their pre-classification defaults.
    pub fn from_submission(submission: EmailSubmission) -> Self {
        Self {
            user_id: submission.user_id,
            message_id: submission.message_id,
            subject: submission.subject,
            body: submission.body,
            sender: submission.sender,
            recipient: submission.recipient,
            category: None,
            is_vip: false,
            priority: 1,
            proposed_action: ProposedAction::None,
            draft: None,
            decisions: Vec::new(),
        }
    }

    /// Whether the draft is present and non-empty.
    pub fn has_draft(&self) -> bool {
        self.draft.as_deref().is_some_and(|d| !d.trim().is_empty())
    }
}
