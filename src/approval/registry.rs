//! Pending approval registry — the single source of truth for "what needs
//! a human decision right now".
//!
//! In-memory and lost on restart; the trade is accepted for the minimal
//! design. Entries are small serializable values, so a durable swap only
//! has to persist `PendingApproval` rows and retire them idempotently.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::approval::proposal::PendingApproval;

/// Concurrency-safe store mapping a resume token to a suspended proposal.
///
/// Insertion order is preserved for display stability; callers must not
/// rely on it for correctness. `register` and `resolve` are linearizable
/// per token: the write lock is held for O(queue) map work only, never
/// across an external call.
pub struct PendingApprovals {
    entries: RwLock<VecDeque<PendingApproval>>,
}

impl PendingApprovals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(VecDeque::new()),
        })
    }

    /// Register a suspended proposal and return its resume token.
    ///
    /// The token is `{message_id}-{8 hex chars}`; the random suffix keeps
    /// tokens unique across repeated runs of the same message, and is
    /// regenerated on the (unlikely) collision with a live entry. Never
    /// overwrites an existing entry.
    pub async fn register(&self, mut entry: PendingApproval) -> String {
        let mut entries = self.entries.write().await;

        let token = loop {
            let candidate = new_token(&entry.message_id);
            if !entries.iter().any(|e| e.resume_token == candidate) {
                break candidate;
            }
            warn!(message_id = %entry.message_id, "Resume token collision, regenerating");
        };

        entry.resume_token = token.clone();
        info!(
            token = %token,
            message_id = %entry.message_id,
            to = %entry.payload.proposal.to,
            "Proposal registered, awaiting approval"
        );
        entries.push_back(entry);
        token
    }

    /// Snapshot of all live entries, in insertion order.
    pub async fn list(&self) -> Vec<PendingApproval> {
        self.entries.read().await.iter().cloned().collect()
    }

    /// Atomically remove and return the entry for a token.
    ///
    /// At-most-once: a second call with the same token returns `None`.
    /// This is what makes a duplicate approval click or a retried HTTP
    /// call unable to double-send.
    pub async fn resolve(&self, token: &str) -> Option<PendingApproval> {
        let mut entries = self.entries.write().await;
        let position = entries.iter().position(|e| e.resume_token == token)?;
        let entry = entries.remove(position);
        if entry.is_some() {
            info!(token = %token, "Proposal resolved and retired");
        }
        entry
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry has no live entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Generate a resume token for a message.
fn new_token(message_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{message_id}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::proposal::ReplyProposal;
    use crate::pipeline::context::{Category, EmailSubmission, MessageContext};

    fn make_entry(message_id: &str) -> PendingApproval {
        let mut ctx = MessageContext::from_submission(EmailSubmission {
            user_id: "u_local".into(),
            message_id: message_id.into(),
            subject: "Meeting".into(),
            body: "Can we meet?".into(),
            sender: "Alice <alice@example.com>".into(),
            recipient: None,
        });
        ctx.category = Some(Category::NeedsReply);
        PendingApproval::from_context(
            &ctx,
            ReplyProposal {
                to: "alice@example.com".into(),
                subject: "Re: Meeting".into(),
                body: "Tuesday works.".into(),
                original_sender: "Alice <alice@example.com>".into(),
                original_subject: "Meeting".into(),
            },
        )
    }

    #[tokio::test]
    async fn register_makes_entry_visible() {
        let registry = PendingApprovals::new();
        assert!(registry.is_empty().await);

        let token = registry.register(make_entry("m-1")).await;
        assert!(token.starts_with("m-1-"));

        let pending = registry.list().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resume_token, token);
    }

    #[tokio::test]
    async fn resolve_is_at_most_once() {
        let registry = PendingApprovals::new();
        let token = registry.register(make_entry("m-1")).await;

        let first = registry.resolve(&token).await;
        assert!(first.is_some());
        assert_eq!(first.unwrap().message_id, "m-1");

        let second = registry.resolve(&token).await;
        assert!(second.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn resolve_unknown_token_is_none() {
        let registry = PendingApprovals::new();
        registry.register(make_entry("m-1")).await;
        assert!(registry.resolve("m-1-deadbeef").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn list_is_idempotent() {
        let registry = PendingApprovals::new();
        registry.register(make_entry("m-1")).await;
        registry.register(make_entry("m-2")).await;

        let first = registry.list().await;
        let second = registry.list().await;
        let tokens: Vec<_> = first.iter().map(|e| e.resume_token.clone()).collect();
        let tokens_again: Vec<_> = second.iter().map(|e| e.resume_token.clone()).collect();
        assert_eq!(tokens, tokens_again);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn list_preserves_insertion_order() {
        let registry = PendingApprovals::new();
        let t1 = registry.register(make_entry("m-1")).await;
        let t2 = registry.register(make_entry("m-2")).await;
        let t3 = registry.register(make_entry("m-3")).await;

        let tokens: Vec<_> = registry
            .list()
            .await
            .into_iter()
            .map(|e| e.resume_token)
            .collect();
        assert_eq!(tokens, vec![t1, t2, t3]);
    }

    #[tokio::test]
    async fn same_message_can_have_two_live_proposals() {
        // Resubmitting a message while an earlier proposal is pending
        // registers a second live entry under a distinct token.
        let registry = PendingApprovals::new();
        let t1 = registry.register(make_entry("m-1")).await;
        let t2 = registry.register(make_entry("m-1")).await;
        assert_ne!(t1, t2);
        assert_eq!(registry.len().await, 2);

        registry.resolve(&t1).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.list().await[0].resume_token, t2);
    }

    #[tokio::test]
    async fn concurrent_resolves_yield_exactly_one_winner() {
        let registry = PendingApprovals::new();
        let token = registry.register(make_entry("m-1")).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let token = token.clone();
            handles.push(tokio::spawn(
                async move { registry.resolve(&token).await },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(registry.is_empty().await);
    }
}
