//! RSVP change queue access and draining.
//!
//! The queue delivers at least once and does not preserve order. Messages
//! are acknowledged by deleting them with the receipt handed out on receive.

use async_trait::async_trait;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AlertError, Result};
use crate::model::RsvpLog;

/// Default number of messages requested per receive.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Suffix of spool files that were received but not yet deleted.
const CLAIM_SUFFIX: &str = ".claimed";

/// A received message and the handle that acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub receipt: String,
}

/// Source of RSVP change messages.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Get the name of this queue backend.
    fn name(&self) -> &'static str;

    /// Receive up to `max` pending messages.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>>;

    /// Acknowledge a message so it is not delivered again.
    async fn delete(&self, receipt: &str) -> Result<()>;
}

/// Directory-backed queue: one JSON file per message.
///
/// Receiving renames a file to `<name>.claimed`; deleting removes it.
/// Claims left behind by a crashed run are released on [`SpoolQueue::open`].
pub struct SpoolQueue {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl SpoolQueue {
    /// Open (and create if needed) a spool directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut released = 0_usize;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(original) = name.strip_suffix(CLAIM_SUFFIX) {
                tokio::fs::rename(entry.path(), dir.join(original)).await?;
                released += 1;
            }
        }

        if released > 0 {
            info!(
                released,
                dir = %dir.display(),
                "Released unacknowledged messages back to the spool"
            );
        }

        Ok(Self {
            dir,
            sequence: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a message body to the spool.
    pub async fn enqueue(&self, body: &str) -> Result<String> {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!("{nanos:020}-{seq:06}.json");

        let staging = self.dir.join(format!("{name}.tmp"));
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, self.dir.join(&name)).await?;

        debug!(message = %name, "Enqueued message");
        Ok(name)
    }

    async fn pending(&self) -> Result<Vec<String>> {
        let mut names = vec![];
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl MessageQueue for SpoolQueue {
    fn name(&self) -> &'static str {
        "spool"
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>> {
        let mut messages = vec![];

        for name in self.pending().await? {
            if messages.len() >= max {
                break;
            }

            let receipt = format!("{name}{CLAIM_SUFFIX}");
            let claimed = self.dir.join(&receipt);
            match tokio::fs::rename(self.dir.join(&name), &claimed).await {
                Ok(()) => {}
                // Claimed by a concurrent consumer
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            // Undecodable bytes still yield a message so the drainer can
            // count it as malformed and delete it
            let bytes = tokio::fs::read(&claimed).await?;
            let body = match String::from_utf8(bytes) {
                Ok(body) => body,
                Err(e) => {
                    warn!(message = %name, "Message body is not valid UTF-8");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            messages.push(QueueMessage { body, receipt });
        }

        Ok(messages)
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        if receipt.contains(&['/', '\\'][..]) || !receipt.ends_with(CLAIM_SUFFIX) {
            return Err(AlertError::Other(format!("Invalid receipt: {receipt}")));
        }
        tokio::fs::remove_file(self.dir.join(receipt)).await?;
        Ok(())
    }
}

/// Counters and parsed logs from one drain.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Parsed logs, ordered by timestamp.
    pub logs: Vec<RsvpLog>,
    /// Messages received, parsed or not.
    pub received: usize,
    /// Bodies that were not valid RSVP logs.
    pub malformed: usize,
    /// Acknowledgements that failed (the message may be redelivered).
    pub delete_failures: usize,
}

/// Pulls every pending message off a queue.
pub struct QueueDrainer {
    queue: Arc<dyn MessageQueue>,
    page_size: usize,
}

impl QueueDrainer {
    #[must_use]
    pub fn new(queue: Arc<dyn MessageQueue>, page_size: usize) -> Self {
        Self {
            queue,
            page_size: page_size.max(1),
        }
    }

    /// Receive pages until a short page arrives, acknowledging each page.
    ///
    /// A failed receive on the first page is an error; later failures end
    /// the drain with what was collected, since those messages are already
    /// acknowledged.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        let mut outcome = DrainOutcome::default();
        let queue_name = self.queue.name();
        let mut first_page = true;

        loop {
            debug!(queue = queue_name, "Retrieving messages");
            let page = match self.queue.receive(self.page_size).await {
                Ok(page) => page,
                Err(e) if !first_page => {
                    warn!(queue = queue_name, error = %e, "Receive failed, ending drain early");
                    break;
                }
                Err(e) => return Err(e),
            };
            first_page = false;
            outcome.received += page.len();

            for message in &page {
                match serde_json::from_str::<RsvpLog>(&message.body) {
                    Ok(log) => outcome.logs.push(log),
                    Err(e) => {
                        outcome.malformed += 1;
                        warn!(
                            queue = queue_name,
                            receipt = %message.receipt,
                            error = %e,
                            "Discarding malformed RSVP message"
                        );
                    }
                }
            }

            let deletes = page.iter().map(|message| self.queue.delete(&message.receipt));
            for (message, result) in page.iter().zip(join_all(deletes).await) {
                if let Err(e) = result {
                    outcome.delete_failures += 1;
                    warn!(
                        queue = queue_name,
                        receipt = %message.receipt,
                        error = %e,
                        "Failed to delete message"
                    );
                }
            }

            if page.len() < self.page_size {
                break;
            }
        }

        outcome.logs.sort_by_key(|log| log.timestamp);

        info!(
            queue = queue_name,
            received = outcome.received,
            parsed = outcome.logs.len(),
            malformed = outcome.malformed,
            delete_failures = outcome.delete_failures,
            "Queue drained"
        );

        Ok(outcome)
    }
}
