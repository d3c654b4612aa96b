//! Suspended proposal types — the serializable snapshot of a paused
//! pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::context::{Category, MessageContext, ProposalEdits};

/// Tool name advertised on send-message proposals.
pub const TOOL_SEND_MESSAGE: &str = "send_message";

/// The concrete message a human is asked to approve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyProposal {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub original_sender: String,
    pub original_subject: String,
}

impl ReplyProposal {
    /// Apply field-level edits: edited values win, absent fields keep the
    /// stored proposal's values.
    pub fn merge_edits(&self, edits: &ProposalEdits) -> ReplyProposal {
        ReplyProposal {
            to: edits.to.clone().unwrap_or_else(|| self.to.clone()),
            subject: edits.subject.clone().unwrap_or_else(|| self.subject.clone()),
            body: edits.body.clone().unwrap_or_else(|| self.body.clone()),
            original_sender: self.original_sender.clone(),
            original_subject: self.original_subject.clone(),
        }
    }
}

/// Everything the approval surface needs to render and act on a proposal.
///
/// The `allow_*` flags are static capability hints for the surface; the
/// minimal design always offers edit/accept/ignore and never free-form
/// respond.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub tool: String,
    pub allow_edit: bool,
    pub allow_accept: bool,
    pub allow_ignore: bool,
    pub allow_respond: bool,
    pub priority: u8,
    pub is_vip: bool,
    pub proposal: ReplyProposal,
}

/// A live registry entry: the payload plus metadata for filtering and
/// audit. Owned exclusively by the registry until a resolution call
/// retires it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    /// Opaque token correlating this entry with its resolution call.
    pub resume_token: String,
    pub payload: ApprovalPayload,
    pub category: Category,
    pub priority: u8,
    pub is_vip: bool,
    pub user_id: String,
    pub message_id: String,
    pub registered_at: DateTime<Utc>,
}

impl PendingApproval {
    /// Build a registry entry from a gated pipeline context. The token is
    /// assigned by the registry at registration time.
    pub fn from_context(ctx: &MessageContext, proposal: ReplyProposal) -> Self {
        Self {
            resume_token: String::new(),
            payload: ApprovalPayload {
                tool: TOOL_SEND_MESSAGE.to_string(),
                allow_edit: true,
                allow_accept: true,
                allow_ignore: true,
                allow_respond: false,
                priority: ctx.priority,
                is_vip: ctx.is_vip,
                proposal,
            },
            category: ctx.category.unwrap_or(Category::Fyi),
            priority: ctx.priority,
            is_vip: ctx.is_vip,
            user_id: ctx.user_id.clone(),
            message_id: ctx.message_id.clone(),
            registered_at: Utc::now(),
        }
    }
}
