//! One batch run: drain, snapshot, reconcile, dispatch.

use std::sync::Arc;
use tracing::info;

use crate::channels::Mailer;
use crate::config::AlertConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::queue::{QueueDrainer, SpoolQueue};
use crate::reconcile::{Reconciler, SentenceStyle};
use crate::snapshot::{BlobEventStore, EventStore, SnapshotLoader};

/// How far a run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// The queue was empty
    NoMessages,
    /// Messages arrived but every change netted out or was skipped
    NoChanges,
    /// Digests were planned and sent
    Dispatched,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoMessages => "no_messages",
            Self::NoChanges => "no_changes",
            Self::Dispatched => "dispatched",
        }
    }
}

/// Counters from one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub status: JobStatus,
    pub received: usize,
    pub malformed: usize,
    pub delete_failures: usize,
    pub logs: usize,
    pub unresolved_events: Vec<String>,
    pub skipped_logs: usize,
    pub events_changed: usize,
    pub changes: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped_recipients: usize,
}

impl JobSummary {
    fn new(status: JobStatus) -> Self {
        Self {
            status,
            received: 0,
            malformed: 0,
            delete_failures: 0,
            logs: 0,
            unresolved_events: vec![],
            skipped_logs: 0,
            events_changed: 0,
            changes: 0,
            sent: 0,
            failed: 0,
            skipped_recipients: 0,
        }
    }
}

/// The RSVP alert batch job.
pub struct AlertJob {
    drainer: QueueDrainer,
    loader: SnapshotLoader,
    event_store: Arc<dyn EventStore>,
    dispatcher: Dispatcher,
    style: SentenceStyle,
}

impl AlertJob {
    #[must_use]
    pub fn new(
        drainer: QueueDrainer,
        loader: SnapshotLoader,
        event_store: Arc<dyn EventStore>,
        dispatcher: Dispatcher,
        style: SentenceStyle,
    ) -> Self {
        Self {
            drainer,
            loader,
            event_store,
            dispatcher,
            style,
        }
    }

    /// Wire up a job from configuration.
    ///
    /// Opens the spool queue (releasing stale claims) and every blob store
    /// the configuration names.
    pub async fn from_config(config: &AlertConfig, mailer: Arc<dyn Mailer>) -> Result<Self> {
        let queue = SpoolQueue::open(config.queue_dir.clone()).await?;
        let loader = SnapshotLoader::new(config.events_source.open()?, config.backend_source.open()?)
            .with_template_key(config.template_key.clone());
        let event_store = BlobEventStore::new(
            config.event_records_source.open()?,
            config.event_records_prefix.clone(),
        );

        Ok(Self::new(
            QueueDrainer::new(Arc::new(queue), config.page_size),
            loader,
            Arc::new(event_store),
            Dispatcher::new(mailer, config.sender()),
            config.style.clone(),
        ))
    }

    /// Run one batch.
    ///
    /// Messages are deleted as they are drained, so a failure after the
    /// drain loses that batch rather than alerting twice.
    pub async fn run(&self) -> Result<JobSummary> {
        let drained = self.drainer.drain().await?;

        let mut summary = JobSummary::new(JobStatus::NoMessages);
        summary.received = drained.received;
        summary.malformed = drained.malformed;
        summary.delete_failures = drained.delete_failures;
        summary.logs = drained.logs.len();

        if drained.logs.is_empty() {
            info!(
                received = summary.received,
                malformed = summary.malformed,
                "No RSVP changes to process"
            );
            return Ok(summary);
        }

        let mut snapshot = self.loader.load().await?;
        summary.unresolved_events = snapshot
            .backfill_events(&drained.logs, self.event_store.as_ref())
            .await;

        let reconciliation =
            Reconciler::new(&snapshot.events, &snapshot.players, &self.style).reconcile(&drained.logs);
        summary.skipped_logs = reconciliation.skipped;
        summary.events_changed = reconciliation.table.len();
        summary.changes = reconciliation.table.change_count();

        if reconciliation.table.is_empty() {
            summary.status = JobStatus::NoChanges;
            info!(
                logs = summary.logs,
                skipped = summary.skipped_logs,
                "All RSVP changes netted out, nothing to send"
            );
            return Ok(summary);
        }

        let report = self.dispatcher.dispatch(&reconciliation, &snapshot).await?;
        summary.status = JobStatus::Dispatched;
        summary.sent = report.sent;
        summary.failed = report.failed.len();
        summary.skipped_recipients = report.skipped;

        info!(
            status = summary.status.as_str(),
            logs = summary.logs,
            events = summary.events_changed,
            changes = summary.changes,
            sent = summary.sent,
            failed = summary.failed,
            "RSVP alert run complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MockMailer;
    use crate::dispatch::{OutboundEmail, Sender};
    use crate::error::AlertError;
    use crate::model::GameEvent;
    use crate::queue::{MessageQueue, QueueMessage};
    use crate::snapshot::BlobStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryQueue {
        messages: Mutex<Vec<QueueMessage>>,
    }

    impl MemoryQueue {
        fn new(bodies: &[&str]) -> Self {
            Self {
                messages: Mutex::new(
                    bodies
                        .iter()
                        .enumerate()
                        .map(|(i, body)| QueueMessage {
                            body: (*body).to_string(),
                            receipt: format!("r-{i}"),
                        })
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl MessageQueue for MemoryQueue {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>> {
            let mut messages = self.messages.lock().unwrap();
            let n = max.min(messages.len());
            Ok(messages.drain(..n).collect())
        }

        async fn delete(&self, _receipt: &str) -> Result<()> {
            Ok(())
        }
    }

    struct MemoryBlobs(HashMap<&'static str, String>);

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn get(&self, key: &str) -> Result<String> {
            self.0
                .get(key)
                .cloned()
                .ok_or_else(|| AlertError::NotFound(key.to_string()))
        }
    }

    struct NoEvents;

    #[async_trait]
    impl EventStore for NoEvents {
        async fn get_event(&self, _event_id: &str) -> Result<Option<GameEvent>> {
            Ok(None)
        }
    }

    fn blobs() -> Arc<dyn BlobStore> {
        Arc::new(MemoryBlobs(HashMap::from([
            (
                "events.json",
                r#"[{"event_id":"e-1","date":"2025-01-05T19:00:00Z","host":"u-hank","game":"Catan",
                    "attending":[],"not_attending":[],"player_pool":[],"organizer_pool":[]}]"#
                    .to_string(),
            ),
            (
                "players_groups.json",
                r#"{"Users":{
                    "u-alice":{"groups":[],"attrib":{"given_name":"Alice","email":"alice@example.com"}},
                    "u-hank":{"groups":[],"attrib":{"given_name":"Hank","email":"hank@example.com"}}}}"#
                    .to_string(),
            ),
            (
                "email_alert_preferences.json",
                r#"{"rsvp_all":["u-alice"],"rsvp_hosted":["u-hank"]}"#.to_string(),
            ),
        ])))
    }

    fn log(minute: u32, action: &str, rsvp: &str, event_id: &str) -> String {
        format!(
            r#"{{"timestamp":"2025-01-04T22:{minute:02}:00Z","action":"{action}","auth_sub":"u-alice",
                "auth_type":"self","event_id":"{event_id}","user_id":"u-alice","rsvp":"{rsvp}"}}"#
        )
    }

    fn job(bodies: &[&str], mailer: MockMailer) -> AlertJob {
        let store = blobs();
        AlertJob::new(
            QueueDrainer::new(Arc::new(MemoryQueue::new(bodies)), 10),
            SnapshotLoader::new(store.clone(), store),
            Arc::new(NoEvents),
            Dispatcher::new(
                Arc::new(mailer),
                Sender {
                    from: "Game Knight RSVP Alert <alert@mail.cubesandcardboard.net>".to_string(),
                    subject: "RSVP Alert".to_string(),
                },
            ),
            SentenceStyle::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let summary = job(&[], MockMailer::new()).run().await.unwrap();
        assert_eq!(summary.status, JobStatus::NoMessages);
        assert_eq!(summary.received, 0);
    }

    #[tokio::test]
    async fn test_netted_out_changes_send_nothing() {
        let first = log(0, "add", "attending", "e-1");
        let second = log(5, "delete", "attending", "e-1");

        let summary = job(&[&second, &first], MockMailer::new()).run().await.unwrap();

        assert_eq!(summary.status, JobStatus::NoChanges);
        assert_eq!(summary.logs, 2);
        assert_eq!(summary.changes, 0);
    }

    #[tokio::test]
    async fn test_dispatches_to_all_and_host() {
        let mut mailer = MockMailer::new();
        mailer.expect_name().return_const("mock");
        mailer
            .expect_send()
            .times(2)
            .withf(|email: &OutboundEmail| email.text_body.starts_with("Catan (Jan 5, 2025):\n"))
            .returning(|_| Ok(()));

        let attend = log(0, "add", "attending", "e-1");
        let unknown = log(1, "add", "attending", "e-404");
        let summary = job(&[&attend, &unknown, "not json"], mailer).run().await.unwrap();

        assert_eq!(summary.status, JobStatus::Dispatched);
        assert_eq!(summary.received, 3);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.unresolved_events, vec!["e-404".to_string()]);
        assert_eq!(summary.skipped_logs, 1);
        assert_eq!(summary.events_changed, 1);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 0);
    }
}
