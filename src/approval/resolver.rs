//! Approval resolver — consumes a human decision, performs the gated side
//! effect, and retires the registry entry.
//!
//! Resolution is a distinct invocation, not a continuation of the
//! suspended pipeline run: the resolver works from the stored proposal
//! alone and never re-enters the classify/draft stages.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::approval::proposal::PendingApproval;
use crate::approval::registry::PendingApprovals;
use crate::error::ApprovalError;
use crate::pipeline::context::ProposalEdits;
use crate::store::{AuditAction, HistoryRecord, Storage};
use crate::transport::MailTransport;

/// Terminal outcome of a resolution call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Approved and delivered.
    Sent { message_id: String },
    /// Denied by the human; nothing was sent.
    Denied,
    /// Approved but the send collaborator failed. The proposal is retired
    /// either way — the human must compose a new message rather than the
    /// system silently retrying.
    Error { message: String },
}

/// Resolves human decisions against the pending approval registry.
pub struct ApprovalResolver {
    registry: Arc<PendingApprovals>,
    transport: Arc<dyn MailTransport>,
    store: Arc<dyn Storage>,
}

impl ApprovalResolver {
    pub fn new(
        registry: Arc<PendingApprovals>,
        transport: Arc<dyn MailTransport>,
        store: Arc<dyn Storage>,
    ) -> Self {
        Self {
            registry,
            transport,
            store,
        }
    }

    /// Apply a decision to the proposal registered under `token`.
    ///
    /// The entry is retired before any side effect, so a concurrent or
    /// repeated call with the same token gets `UnknownToken` — the
    /// at-most-once send guarantee lives in the registry, not here.
    pub async fn resolve_decision(
        &self,
        token: &str,
        approved: bool,
        edits: Option<ProposalEdits>,
    ) -> Result<Resolution, ApprovalError> {
        let entry = self
            .registry
            .resolve(token)
            .await
            .ok_or_else(|| ApprovalError::UnknownToken(token.to_string()))?;

        if !approved {
            info!(token = %token, message_id = %entry.message_id, "Proposal denied");
            self.audit(&entry, AuditAction::Denied).await;
            return Ok(Resolution::Denied);
        }

        let proposal = match edits {
            Some(ref edits) => entry.payload.proposal.merge_edits(edits),
            None => entry.payload.proposal.clone(),
        };

        match self
            .transport
            .send(&proposal.to, &proposal.subject, &proposal.body)
            .await
        {
            Ok(message_id) => {
                info!(
                    token = %token,
                    to = %proposal.to,
                    message_id = %message_id,
                    "Approved reply sent"
                );
                self.audit(&entry, AuditAction::Sent).await;
                Ok(Resolution::Sent { message_id })
            }
            Err(e) => {
                error!(token = %token, to = %proposal.to, error = %e, "Approved reply failed to send");
                self.audit(&entry, AuditAction::SendFailed).await;
                Ok(Resolution::Error {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Best-effort audit append — a storage hiccup must not mask the
    /// resolution outcome.
    async fn audit(&self, entry: &PendingApproval, action: AuditAction) {
        let record = HistoryRecord::new(
            &entry.user_id,
            &entry.message_id,
            &entry.payload.proposal.original_sender,
            &entry.payload.proposal.original_subject,
            entry.category,
            action,
        );
        if let Err(e) = self.store.append_history(&record).await {
            warn!(error = %e, action = action.as_str(), "Failed to append audit record");
        }
    }
}
