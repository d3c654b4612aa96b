//! Triage pipeline — context types and the three-stage processor.

pub mod context;
pub mod processor;

pub use context::{Category, Decision, EmailSubmission, MessageContext, ProposalEdits, ProposedAction};
pub use processor::{PipelineOutcome, TriagePipeline};
