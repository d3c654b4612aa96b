//! Ambient poll loop — feeds inbound mail into the triage pipeline.
//!
//! Polling-based rather than webhook-based so it works without inbound
//! connectivity. Each message is processed independently; one bad message
//! never stalls the loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::Error;
use crate::pipeline::context::EmailSubmission;
use crate::pipeline::processor::{PipelineOutcome, TriagePipeline};
use crate::transport::MailTransport;

/// Ambient mail poller.
pub struct AmbientPoller {
    transport: Arc<dyn MailTransport>,
    pipeline: Arc<TriagePipeline>,
    user_id: String,
    labels: Vec<String>,
    fetch_batch: usize,
    /// Message ids already handed to the pipeline this process lifetime.
    seen: HashSet<String>,
}

impl AmbientPoller {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        pipeline: Arc<TriagePipeline>,
        user_id: String,
        labels: Vec<String>,
        fetch_batch: usize,
    ) -> Self {
        Self {
            transport,
            pipeline,
            user_id,
            labels,
            fetch_batch,
            seen: HashSet::new(),
        }
    }

    /// One poll tick: list, dedupe, fetch, process.
    ///
    /// Returns the number of messages handed to the pipeline.
    pub async fn tick(&mut self) -> Result<usize, Error> {
        let ids = self
            .transport
            .list_recent(&self.labels, self.fetch_batch)
            .await?;

        let new_ids: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.seen.contains(id))
            .collect();

        if new_ids.is_empty() {
            debug!("No new messages");
            return Ok(0);
        }

        info!(count = new_ids.len(), "Found new messages to process");
        let mut processed = 0;
        for id in new_ids {
            self.seen.insert(id.clone());
            match self.process_message(&id).await {
                Ok(outcome) => {
                    processed += 1;
                    match outcome {
                        PipelineOutcome::Done { .. } => {
                            debug!(message_id = %id, "Message processed to completion");
                        }
                        PipelineOutcome::Interrupted { token, .. } => {
                            info!(message_id = %id, token = %token, "Message awaiting approval");
                        }
                    }
                }
                Err(e) => {
                    error!(message_id = %id, error = %e, "Failed to process message");
                }
            }
        }
        Ok(processed)
    }

    async fn process_message(&self, id: &str) -> Result<PipelineOutcome, Error> {
        let email = self.transport.fetch(id).await?;
        let submission = EmailSubmission {
            user_id: self.user_id.clone(),
            message_id: email.id,
            subject: email.subject,
            body: email.body,
            sender: email.sender,
            recipient: email.recipient,
        };
        Ok(self.pipeline.run(submission).await)
    }
}

/// Spawn the poll loop as a background task.
pub fn spawn_poll_task(
    mut poller: AmbientPoller,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Ambient poll loop started");
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            if let Err(e) = poller.tick().await {
                // Transient transport failures just wait for the next tick
                error!(error = %e, "Poll tick failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::approval::registry::PendingApprovals;
    use crate::error::{DatabaseError, InferenceError, TransportError};
    use crate::inference::{DraftRequest, Inference};
    use crate::pipeline::context::Category;
    use crate::store::{HistoryRecord, Storage, UserProfile, VipContact};
    use crate::transport::RawEmail;

    struct StaticTransport {
        ids: Vec<String>,
        fetches: Mutex<usize>,
    }

    #[async_trait]
    impl MailTransport for StaticTransport {
        async fn list_recent(
            &self,
            _labels: &[String],
            limit: usize,
        ) -> Result<Vec<String>, TransportError> {
            Ok(self.ids.iter().take(limit).cloned().collect())
        }

        async fn fetch(&self, id: &str) -> Result<RawEmail, TransportError> {
            *self.fetches.lock().unwrap() += 1;
            Ok(RawEmail {
                id: id.to_string(),
                subject: "FYI".into(),
                body: "heads up".into(),
                sender: "alice@example.com".into(),
                recipient: None,
            })
        }

        async fn send(
            &self,
            _to: &str,
            _subject: &str,
            _body: &str,
        ) -> Result<String, TransportError> {
            Ok("sent-1".into())
        }
    }

    struct FyiInference;

    #[async_trait]
    impl Inference for FyiInference {
        async fn classify(
            &self,
            _subject: &str,
            _body: &str,
            _sender: &str,
        ) -> Result<Category, InferenceError> {
            Ok(Category::Fyi)
        }

        async fn draft(&self, _request: DraftRequest<'_>) -> Result<String, InferenceError> {
            Ok("ok".into())
        }
    }

    struct NullStore;

    #[async_trait]
    impl Storage for NullStore {
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
            Ok(Vec::new())
        }
        async fn is_vip(&self, _user_id: &str, _address: &str) -> Result<bool, DatabaseError> {
            Ok(false)
        }
        async fn append_history(&self, _record: &HistoryRecord) -> Result<(), DatabaseError> {
            Ok(())
        }
        async fn recent_history(
            &self,
            _user_id: &str,
            _limit: usize,
        ) -> Result<Vec<HistoryRecord>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn tick_processes_each_message_once() {
        let transport = Arc::new(StaticTransport {
            ids: vec!["m-1".into(), "m-2".into()],
            fetches: Mutex::new(0),
        });
        let registry = PendingApprovals::new();
        let pipeline = Arc::new(TriagePipeline::new(
            Arc::new(FyiInference),
            Arc::new(NullStore),
            registry,
        ));

        let mut poller = AmbientPoller::new(
            Arc::clone(&transport) as Arc<dyn MailTransport>,
            pipeline,
            "u_local".into(),
            vec!["INBOX".into()],
            20,
        );

        assert_eq!(poller.tick().await.unwrap(), 2);
        // Second tick sees the same ids, all deduped
        assert_eq!(poller.tick().await.unwrap(), 0);
        assert_eq!(*transport.fetches.lock().unwrap(), 2);
    }
}
