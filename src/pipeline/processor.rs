//! Triage pipeline — a deterministic three-stage state machine.
//!
//! **Core invariant: no outbound message without human approval.**
//! The only side-effecting action (send) is never performed here; the Gate
//! stage externalizes it as a suspended proposal and hands control back to
//! the caller. Resumption happens on a different control path entirely
//! (the approval resolver), possibly much later, possibly never.
//!
//! Flow: Classify → Draft → Gate → Done | Suspended.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::approval::proposal::{ApprovalPayload, PendingApproval, ReplyProposal};
use crate::approval::registry::PendingApprovals;
use crate::error::PipelineError;
use crate::inference::{DraftRequest, Inference};
use crate::pipeline::context::{
    Category, EmailSubmission, MessageContext, ProposedAction,
};
use crate::store::{AuditAction, HistoryRecord, Storage};
use crate::transport::extract_address;

/// Draft used when generation fails mid-stage; still gated so the human
/// sees that a reply was wanted but couldn't be produced.
const DRAFT_ERROR_FALLBACK: &str = "Error generating reply. Please review manually.";

// ── States ──────────────────────────────────────────────────────────

/// Pipeline stages, advanced in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Classifying,
    Drafting,
    Gating,
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineOutcome {
    /// No further action needed; the context is final.
    Done {
        #[serde(rename = "final_context")]
        context: MessageContext,
    },
    /// Suspended awaiting human approval. From the caller's point of view
    /// the run is in flight, not terminal.
    Interrupted {
        token: String,
        #[serde(rename = "proposal")]
        payload: ApprovalPayload,
    },
}

// ── Pipeline ────────────────────────────────────────────────────────

/// Runs the three stages over one message's context.
///
/// Owns no mutable state of its own; the registry is the only shared
/// resource, touched exactly once per run (at the gate) and never while
/// a collaborator call is in flight.
pub struct TriagePipeline {
    inference: Arc<dyn Inference>,
    store: Arc<dyn Storage>,
    registry: Arc<PendingApprovals>,
}

impl TriagePipeline {
    pub fn new(
        inference: Arc<dyn Inference>,
        store: Arc<dyn Storage>,
        registry: Arc<PendingApprovals>,
    ) -> Self {
        Self {
            inference,
            store,
            registry,
        }
    }

    /// Process one submission to a terminal state.
    ///
    /// Infallible: collaborator failures degrade to a no-action verdict
    /// instead of surfacing as errors.
    pub async fn run(&self, submission: EmailSubmission) -> PipelineOutcome {
        info!(
            message_id = %submission.message_id,
            sender = %submission.sender,
            "Processing inbound email"
        );

        let mut ctx = MessageContext::from_submission(submission);
        let mut stage = Stage::Classifying;
        loop {
            stage = match stage {
                Stage::Classifying => {
                    self.classify(&mut ctx).await;
                    Stage::Drafting
                }
                Stage::Drafting => {
                    self.draft(&mut ctx).await;
                    Stage::Gating
                }
                Stage::Gating => return self.gate(ctx).await,
            };
        }
    }

    // ── Classify ────────────────────────────────────────────────────

    /// VIP lookup + classification. Degrades to `Fyi`/no-action on any
    /// collaborator failure — a submission never fails because the model
    /// or the store did.
    async fn classify(&self, ctx: &mut MessageContext) {
        match self.classify_inner(ctx).await {
            Ok(()) => {
                info!(
                    message_id = %ctx.message_id,
                    category = %ctx.category.unwrap_or(Category::Fyi),
                    is_vip = ctx.is_vip,
                    "Email triaged"
                );
            }
            Err(e) => {
                warn!(
                    message_id = %ctx.message_id,
                    error = %e,
                    "Classify stage failed, degrading to fyi/no-action"
                );
                ctx.category = Some(Category::Fyi);
                ctx.proposed_action = ProposedAction::None;
                ctx.is_vip = false;
                ctx.priority = 1;
            }
        }
    }

    async fn classify_inner(&self, ctx: &mut MessageContext) -> Result<(), PipelineError> {
        let sender_address = extract_address(&ctx.sender);

        ctx.is_vip = self.store.is_vip(&ctx.user_id, &sender_address).await?;
        ctx.priority = if ctx.is_vip { 2 } else { 1 };

        let category = self
            .inference
            .classify(&ctx.subject, &ctx.body, &ctx.sender)
            .await?;
        ctx.category = Some(category);
        ctx.proposed_action = ProposedAction::for_category(category);

        self.audit(ctx, category, AuditAction::Triage).await;
        Ok(())
    }

    // ── Draft ───────────────────────────────────────────────────────

    /// Draft generation, only for `NeedsReply`. A failed generation sets a
    /// fixed fallback so the gate still fires and a human still sees the
    /// message.
    async fn draft(&self, ctx: &mut MessageContext) {
        if ctx.category != Some(Category::NeedsReply) {
            debug!(message_id = %ctx.message_id, "No reply needed, skipping draft");
            return;
        }

        match self.draft_inner(ctx).await {
            Ok(draft) => {
                ctx.draft = Some(draft);
                self.audit(ctx, Category::NeedsReply, AuditAction::DraftGenerated)
                    .await;
                info!(message_id = %ctx.message_id, "Draft generated");
            }
            Err(e) => {
                warn!(
                    message_id = %ctx.message_id,
                    error = %e,
                    "Draft stage failed, using fallback text"
                );
                ctx.draft = Some(DRAFT_ERROR_FALLBACK.to_string());
            }
        }
    }

    async fn draft_inner(&self, ctx: &MessageContext) -> Result<String, PipelineError> {
        let profile = self.store.get_profile(&ctx.user_id).await?;
        let vip_addresses = self.store.vip_addresses(&ctx.user_id).await?;

        let draft = self
            .inference
            .draft(DraftRequest {
                subject: &ctx.subject,
                body: &ctx.body,
                tone: &profile.tone,
                scheduling_window: &profile.preferred_meeting_hours,
                sender: &ctx.sender,
                vip_addresses: &vip_addresses,
            })
            .await?;
        Ok(draft)
    }

    // ── Gate ────────────────────────────────────────────────────────

    /// Decide whether the proposed action needs human approval.
    ///
    /// Fires iff the action is a send and a draft exists. Registers the
    /// proposal and returns immediately — suspension is a one-way handoff,
    /// no thread waits on the decision.
    async fn gate(&self, ctx: MessageContext) -> PipelineOutcome {
        let gated = ctx.proposed_action == ProposedAction::SendMessage && ctx.has_draft();
        if !gated {
            debug!(message_id = %ctx.message_id, "Nothing to approve, run complete");
            return PipelineOutcome::Done { context: ctx };
        }

        let sender_address = extract_address(&ctx.sender);
        let proposal = ReplyProposal {
            to: sender_address,
            subject: format!("Re: {}", ctx.subject),
            body: ctx.draft.clone().unwrap_or_default(),
            original_sender: ctx.sender.clone(),
            original_subject: ctx.subject.clone(),
        };

        self.audit(
            &ctx,
            ctx.category.unwrap_or(Category::Fyi),
            AuditAction::AwaitingApproval,
        )
        .await;

        let entry = PendingApproval::from_context(&ctx, proposal);
        let payload = entry.payload.clone();
        let token = self.registry.register(entry).await;

        info!(
            message_id = %ctx.message_id,
            token = %token,
            to = %payload.proposal.to,
            "Pipeline suspended for approval"
        );

        PipelineOutcome::Interrupted { token, payload }
    }

    // ── Audit ───────────────────────────────────────────────────────

    /// Best-effort audit append; failures are logged, never propagated.
    async fn audit(&self, ctx: &MessageContext, category: Category, action: AuditAction) {
        let record = HistoryRecord::new(
            &ctx.user_id,
            &ctx.message_id,
            &ctx.sender,
            &ctx.subject,
            category,
            action,
        );
        if let Err(e) = self.store.append_history(&record).await {
            warn!(error = %e, action = action.as_str(), "Failed to append audit record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{DatabaseError, InferenceError};
    use crate::store::{UserProfile, VipContact};

    // ── Mocks ───────────────────────────────────────────────────────

    /// Mock inference with a fixed classification and draft.
    struct MockInference {
        category: Category,
        draft: &'static str,
        fail_classify: bool,
        fail_draft: bool,
    }

    impl MockInference {
        fn classifying(category: Category) -> Arc<Self> {
            Arc::new(Self {
                category,
                draft: "Sure, Tuesday works for me.",
                fail_classify: false,
                fail_draft: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                category: Category::NeedsReply,
                draft: "",
                fail_classify: true,
                fail_draft: true,
            })
        }

        fn draft_failing(category: Category) -> Arc<Self> {
            Arc::new(Self {
                category,
                draft: "",
                fail_classify: false,
                fail_draft: true,
            })
        }
    }

    #[async_trait]
    impl Inference for MockInference {
        async fn classify(
            &self,
            _subject: &str,
            _body: &str,
            _sender: &str,
        ) -> Result<Category, InferenceError> {
            if self.fail_classify {
                return Err(InferenceError::RequestFailed("model unavailable".into()));
            }
            Ok(self.category)
        }

        async fn draft(&self, _request: DraftRequest<'_>) -> Result<String, InferenceError> {
            if self.fail_draft {
                return Err(InferenceError::RequestFailed("model unavailable".into()));
            }
            Ok(self.draft.to_string())
        }
    }

    /// Mock storage with an in-memory VIP set and audit log.
    struct MockStore {
        vips: Vec<String>,
        history: Mutex<Vec<HistoryRecord>>,
        fail_vip_lookup: bool,
    }

    impl MockStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                vips: Vec::new(),
                history: Mutex::new(Vec::new()),
                fail_vip_lookup: false,
            })
        }

        fn with_vip(address: &str) -> Arc<Self> {
            Arc::new(Self {
                vips: vec![address.to_string()],
                history: Mutex::new(Vec::new()),
                fail_vip_lookup: false,
            })
        }

        fn vip_lookup_failing() -> Arc<Self> {
            Arc::new(Self {
                vips: Vec::new(),
                history: Mutex::new(Vec::new()),
                fail_vip_lookup: true,
            })
        }

        fn actions(&self) -> Vec<AuditAction> {
            self.history.lock().unwrap().iter().map(|r| r.action).collect()
        }
    }

    #[async_trait]
    impl Storage for MockStore {
        async fn get_profile(&self, _user_id: &str) -> Result<UserProfile, DatabaseError> {
            Ok(UserProfile::default())
        }

        async fn upsert_profile(
            &self,
            _user_id: &str,
            _patch: serde_json::Value,
        ) -> Result<UserProfile, DatabaseError> {
            Ok(UserProfile::default())
        }

        async fn add_vip(
            &self,
            _user_id: &str,
            _contact: &VipContact,
        ) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn vip_addresses(&self, _user_id: &str) -> Result<Vec<String>, DatabaseError> {
            Ok(self.vips.clone())
        }

        async fn is_vip(&self, _user_id: &str, address: &str) -> Result<bool, DatabaseError> {
            if self.fail_vip_lookup {
                return Err(DatabaseError::Query("db locked".into()));
            }
            Ok(self.vips.iter().any(|v| v.eq_ignore_ascii_case(address)))
        }

        async fn append_history(&self, record: &HistoryRecord) -> Result<(), DatabaseError> {
            self.history.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn recent_history(
            &self,
            _user_id: &str,
            _limit: usize,
        ) -> Result<Vec<HistoryRecord>, DatabaseError> {
            Ok(self.history.lock().unwrap().clone())
        }
    }

    fn submission(subject: &str, body: &str) -> EmailSubmission {
        EmailSubmission {
            user_id: "u_local".into(),
            message_id: "m-1".into(),
            subject: subject.into(),
            body: body.into(),
            sender: "Alice <alice@example.com>".into(),
            recipient: Some("me@example.com".into()),
        }
    }

    fn pipeline(
        inference: Arc<MockInference>,
        store: Arc<MockStore>,
    ) -> (TriagePipeline, Arc<PendingApprovals>) {
        let registry = PendingApprovals::new();
        let p = TriagePipeline::new(
            inference as Arc<dyn Inference>,
            store as Arc<dyn Storage>,
            Arc::clone(&registry),
        );
        (p, registry)
    }

    // ── Stage behavior ──────────────────────────────────────────────

    #[tokio::test]
    async fn schedule_email_completes_without_gating() {
        let store = MockStore::new();
        let (pipeline, registry) =
            pipeline(MockInference::classifying(Category::Schedule), Arc::clone(&store));

        let outcome = pipeline
            .run(submission(
                "Meeting tomorrow at 2 PM",
                "can we schedule a meeting for tomorrow at 2 PM?",
            ))
            .await;

        match outcome {
            PipelineOutcome::Done { context } => {
                assert_eq!(context.category, Some(Category::Schedule));
                assert_eq!(context.proposed_action, ProposedAction::CreateEvent);
                assert!(context.draft.is_none());
            }
            other => panic!("Expected Done, got {other:?}"),
        }
        assert!(registry.is_empty().await);
        assert_eq!(store.actions(), vec![AuditAction::Triage]);
    }

    #[tokio::test]
    async fn needs_reply_email_suspends_with_proposal() {
        let store = MockStore::new();
        let (pipeline, registry) = pipeline(
            MockInference::classifying(Category::NeedsReply),
            Arc::clone(&store),
        );

        let outcome = pipeline
            .run(submission("Project update?", "Could you send me the latest numbers?"))
            .await;

        match outcome {
            PipelineOutcome::Interrupted { token, payload } => {
                assert!(token.starts_with("m-1-"));
                assert_eq!(payload.tool, "send_message");
                assert_eq!(payload.proposal.to, "alice@example.com");
                assert_eq!(payload.proposal.subject, "Re: Project update?");
                assert_eq!(payload.proposal.body, "Sure, Tuesday works for me.");
                assert_eq!(payload.proposal.original_sender, "Alice <alice@example.com>");

                // Visible to list() immediately after suspension
                let pending = registry.list().await;
                assert_eq!(pending.len(), 1);
                assert_eq!(pending[0].resume_token, token);
            }
            other => panic!("Expected Interrupted, got {other:?}"),
        }

        assert_eq!(
            store.actions(),
            vec![
                AuditAction::Triage,
                AuditAction::DraftGenerated,
                AuditAction::AwaitingApproval,
            ]
        );
    }

    #[tokio::test]
    async fn fyi_and_spam_complete_without_draft() {
        for category in [Category::Fyi, Category::Spam] {
            let store = MockStore::new();
            let (pipeline, registry) =
                pipeline(MockInference::classifying(category), store);

            let outcome = pipeline.run(submission("FYI", "heads up")).await;
            match outcome {
                PipelineOutcome::Done { context } => {
                    assert_eq!(context.category, Some(category));
                    assert_eq!(context.proposed_action, ProposedAction::None);
                    assert!(context.draft.is_none());
                }
                other => panic!("Expected Done, got {other:?}"),
            }
            assert!(registry.is_empty().await);
        }
    }

    // ── Degradation ─────────────────────────────────────────────────

    #[tokio::test]
    async fn inference_failure_degrades_to_fyi_no_action() {
        let store = MockStore::new();
        let (pipeline, registry) = pipeline(MockInference::failing(), Arc::clone(&store));

        let outcome = pipeline
            .run(submission("Urgent question?", "Please reply today"))
            .await;

        match outcome {
            PipelineOutcome::Done { context } => {
                assert_eq!(context.category, Some(Category::Fyi));
                assert_eq!(context.proposed_action, ProposedAction::None);
                assert!(!context.is_vip);
                assert_eq!(context.priority, 1);
                assert!(context.draft.is_none());
            }
            other => panic!("Expected Done, got {other:?}"),
        }
        assert!(registry.is_empty().await);
        // Degraded runs don't audit a triage they didn't perform
        assert!(store.actions().is_empty());
    }

    #[tokio::test]
    async fn vip_lookup_failure_also_degrades() {
        let store = MockStore::vip_lookup_failing();
        let (pipeline, registry) = pipeline(
            MockInference::classifying(Category::NeedsReply),
            Arc::clone(&store),
        );

        let outcome = pipeline.run(submission("Question?", "Can you help?")).await;
        match outcome {
            PipelineOutcome::Done { context } => {
                assert_eq!(context.category, Some(Category::Fyi));
                assert_eq!(context.proposed_action, ProposedAction::None);
            }
            other => panic!("Expected Done, got {other:?}"),
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn draft_failure_gates_with_fallback_text() {
        let store = MockStore::new();
        let (pipeline, registry) = pipeline(
            MockInference::draft_failing(Category::NeedsReply),
            Arc::clone(&store),
        );

        let outcome = pipeline.run(submission("Question?", "Can you help?")).await;
        match outcome {
            PipelineOutcome::Interrupted { payload, .. } => {
                assert_eq!(payload.proposal.body, DRAFT_ERROR_FALLBACK);
            }
            other => panic!("Expected Interrupted, got {other:?}"),
        }
        assert_eq!(registry.len().await, 1);
        // No draft_generated audit on the failure path
        assert_eq!(
            store.actions(),
            vec![AuditAction::Triage, AuditAction::AwaitingApproval]
        );
    }

    // ── VIP priority ────────────────────────────────────────────────

    #[tokio::test]
    async fn vip_sender_gets_elevated_priority() {
        let store = MockStore::with_vip("alice@example.com");
        let (pipeline, _registry) = pipeline(
            MockInference::classifying(Category::NeedsReply),
            Arc::clone(&store),
        );

        let outcome = pipeline.run(submission("Question?", "Ping")).await;
        match outcome {
            PipelineOutcome::Interrupted { payload, .. } => {
                assert!(payload.is_vip);
                assert_eq!(payload.priority, 2);
            }
            other => panic!("Expected Interrupted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_vip_sender_gets_normal_priority() {
        let store = MockStore::with_vip("someone-else@example.com");
        let (pipeline, _registry) = pipeline(
            MockInference::classifying(Category::NeedsReply),
            Arc::clone(&store),
        );

        let outcome = pipeline.run(submission("Question?", "Ping")).await;
        match outcome {
            PipelineOutcome::Interrupted { payload, .. } => {
                assert!(!payload.is_vip);
                assert_eq!(payload.priority, 1);
            }
            other => panic!("Expected Interrupted, got {other:?}"),
        }
    }

    // ── Duplicate submissions ───────────────────────────────────────

    #[tokio::test]
    async fn resubmission_registers_second_live_proposal() {
        let store = MockStore::new();
        let (pipeline, registry) = pipeline(
            MockInference::classifying(Category::NeedsReply),
            store,
        );

        let first = pipeline.run(submission("Question?", "Ping")).await;
        let second = pipeline.run(submission("Question?", "Ping")).await;

        let (t1, t2) = match (first, second) {
            (
                PipelineOutcome::Interrupted { token: t1, .. },
                PipelineOutcome::Interrupted { token: t2, .. },
            ) => (t1, t2),
            other => panic!("Expected two Interrupted outcomes, got {other:?}"),
        };
        assert_ne!(t1, t2);
        assert_eq!(registry.len().await, 2);
    }

    // ── Serialization contract ──────────────────────────────────────

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = PipelineOutcome::Done {
            context: MessageContext::from_submission(submission("S", "B")),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "DONE");
        assert!(json["final_context"].is_object());
    }
}
