//! Inference collaborator — classification and draft generation.
//!
//! The model is a possibly-slow, possibly-failing black box. Raw output is
//! normalized here, at the adapter boundary: unknown or unparseable labels
//! become `Fyi` (never `Spam` or `NeedsReply`), and a keyword heuristic
//! stands in when the model call itself fails.

mod gemini;

pub use gemini::{GeminiClient, GeminiConfig};

use async_trait::async_trait;

use crate::error::InferenceError;
use crate::pipeline::context::Category;

/// Inputs for draft generation.
#[derive(Debug, Clone)]
pub struct DraftRequest<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    /// User's tone preference, e.g. "polite, concise, friendly".
    pub tone: &'a str,
    /// Preferred meeting hours to suggest when scheduling comes up.
    pub scheduling_window: &'a str,
    pub sender: &'a str,
    /// Known VIP addresses for the user.
    pub vip_addresses: &'a [String],
}

/// Classification and drafting, as exposed by the inference collaborator.
#[async_trait]
pub trait Inference: Send + Sync {
    /// Classify an email into one of the four categories.
    async fn classify(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
    ) -> Result<Category, InferenceError>;

    /// Draft a reply to an email.
    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, InferenceError>;
}

/// Fallback reply used when draft generation fails or comes back empty.
pub const FALLBACK_REPLY: &str =
    "Thank you for your email. I will review it and get back to you soon.";

// ── Response normalization ──────────────────────────────────────────

/// Expected classification response shape.
#[derive(Debug, serde::Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    email_type: String,
}

/// Normalize raw model output into a `Category`.
///
/// Tries strict JSON first (tolerating markdown fences), then a loose text
/// scan. Anything ambiguous lands on `Fyi` — the bias is toward no action
/// over a wrong action.
pub(crate) fn normalize_classification(raw: &str) -> Category {
    let json_str = extract_json_object(raw);

    if let Ok(response) = serde_json::from_str::<ClassifyResponse>(&json_str) {
        let label = response.email_type.to_lowercase();
        if let Some(category) = Category::parse(&label) {
            return category;
        }
        tracing::warn!(label = %label, "Invalid classification label, defaulting to fyi");
        return Category::Fyi;
    }

    // JSON parse failed — scan the raw text for a recognizable label.
    tracing::warn!(raw = %raw, "Unparseable classification response, scanning text");
    let lower = raw.to_lowercase();
    if lower.contains("needs_reply") {
        Category::NeedsReply
    } else if lower.contains("schedule") {
        Category::Schedule
    } else if lower.contains("spam") {
        Category::Spam
    } else {
        Category::Fyi
    }
}

/// Extract a JSON object from model output (handles markdown fences and
/// surrounding prose).
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

// ── Heuristic fallback ──────────────────────────────────────────────

/// Keyword-based classification for when the model call itself errors.
///
/// Checked in fixed priority order: spam, then scheduling, then
/// needs-reply markers; `Fyi` otherwise. Keeps actionable mail surfaced
/// even with the model down.
pub(crate) fn heuristic_classify(subject: &str, body: &str) -> Category {
    let text = format!("{subject}\n{body}").to_lowercase();

    const SPAM_MARKERS: &[&str] = &[
        "unsubscribe",
        "lottery",
        "win money",
        "win $",
        "congratulations",
        "prize",
        "claim",
        "click here",
        "free money",
        "act now",
        "limited time",
        "guaranteed",
        "no risk",
    ];
    const SCHEDULE_MARKERS: &[&str] = &[
        "meet",
        "meeting",
        "schedule",
        "calendar",
        "call",
        "appointment",
        "invite",
    ];
    const NEEDS_REPLY_MARKERS: &[&str] = &[
        "please reply",
        "confirm",
        "yes/no",
        "deadline",
        "by eod",
        "can you",
        "could you",
        "feedback",
        "review",
        "?",
    ];

    if SPAM_MARKERS.iter().any(|m| text.contains(m)) {
        return Category::Spam;
    }
    if SCHEDULE_MARKERS.iter().any(|m| text.contains(m)) {
        return Category::Schedule;
    }
    if NEEDS_REPLY_MARKERS.iter().any(|m| text.contains(m)) {
        return Category::NeedsReply;
    }
    Category::Fyi
}

// ── Prompt construction ─────────────────────────────────────────────

/// Max email body chars included in the classification prompt.
const CLASSIFY_BODY_CHARS: usize = 500;

/// Max email body chars included in the draft prompt.
const DRAFT_BODY_CHARS: usize = 800;

/// Build the classification prompt.
pub(crate) fn build_classify_prompt(subject: &str, body: &str, sender: &str) -> String {
    let body_preview: String = body.chars().take(CLASSIFY_BODY_CHARS).collect();
    format!(
        "You are an email triage expert. Analyze the email and classify it strictly into one of these categories:\n\n\
         - needs_reply: Requires a response or action from the recipient\n\
         - schedule: Meeting requests, calendar invitations, or scheduling-related\n\
         - fyi: Informational emails that don't require immediate action\n\
         - spam: Unsolicited, promotional, or suspicious emails\n\n\
         Email details:\n\
         Subject: {subject}\n\
         From: {sender}\n\
         Body: {body_preview}\n\n\
         Return ONLY a JSON object with the email_type field:\n\
         {{\"email_type\": \"needs_reply|schedule|fyi|spam\"}}"
    )
}

/// Build the draft-reply prompt.
pub(crate) fn build_draft_prompt(request: &DraftRequest<'_>) -> String {
    let sender_address = crate::transport::extract_address(request.sender);
    let vip_context = if request
        .vip_addresses
        .iter()
        .any(|a| a.eq_ignore_ascii_case(&sender_address))
    {
        " (This is a VIP contact - be extra professional and responsive)"
    } else {
        ""
    };

    let body_preview: String = request.body.chars().take(DRAFT_BODY_CHARS).collect();
    format!(
        "You are a professional email assistant. Write a concise, contextual reply to this email.\n\n\
         Instructions:\n\
         - Tone: {tone}\n\
         - If scheduling is mentioned, suggest times within: {window}\n\
         - Be professional and helpful{vip_context}\n\
         - Keep the reply concise but complete\n\
         - Match the formality level of the original email\n\n\
         Original email:\n\
         Subject: {subject}\n\
         From: {sender}\n\
         Body: {body_preview}\n\n\
         Write your reply (plain text only, no surrounding tags):",
        tone = request.tone,
        window = request.scheduling_window,
        subject = request.subject,
        sender = request.sender,
    )
}
