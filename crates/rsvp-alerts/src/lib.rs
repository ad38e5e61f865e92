//! RSVP change digests for Game Knight events.
//!
//! This crate drains a queue of RSVP change logs, nets each player's changes
//! per event against the event snapshot, and emails one digest per
//! subscriber instead of one alert per click.
//!
//! # Usage
//!
//! ```no_run
//! use rsvp_alerts::{AlertConfig, AlertJob};
//!
//! # async fn run() -> rsvp_alerts::Result<()> {
//! // Build the job from environment variables and a mail transport
//! let config = AlertConfig::from_env()?;
//! let mailer = std::sync::Arc::new(rsvp_alerts::LogMailer::default());
//! let job = AlertJob::from_config(&config, mailer).await?;
//!
//! let summary = job.run().await?;
//! println!("sent {} digests", summary.sent);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! The job is configured via environment variables:
//!
//! - `RSVP_QUEUE_DIR`: spool directory of RSVP change messages
//! - `EVENTS_SOURCE`, `BACKEND_SOURCE`: URL or directory of snapshot blobs
//! - `ALERT_MODE`: `dev` or `prod`, selecting sender and subject
//! - `SMTP_HOST`: SMTP relay (enables sending)
//!
//! See [`AlertConfig::from_env`] for the full list.
//!
//! # Architecture
//!
//! - [`QueueDrainer`] pulls every pending message from a [`MessageQueue`]
//! - [`SnapshotLoader`] fetches events, players and preferences from a [`BlobStore`]
//! - [`Reconciler`] folds the logs into an [`RsvpTable`] of net changes
//! - [`DigestRenderer`] turns the table into text and HTML bodies
//! - [`Dispatcher`] fans digests out to subscribers through a [`Mailer`]

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod model;
pub mod queue;
pub mod reconcile;
pub mod render;
pub mod snapshot;

pub use channels::log::LogMailer;
pub use channels::smtp::SmtpMailer;
pub use channels::Mailer;
pub use config::{AlertConfig, Mode, StoreLocation};
pub use dispatch::{Audience, DispatchReport, Dispatcher, OutboundEmail, Sender};
pub use error::{AlertError, Result};
pub use job::{AlertJob, JobStatus, JobSummary};
pub use model::{AlertPreferences, GameEvent, PlayerDirectory, RsvpLog, RsvpStatus};
pub use queue::{MessageQueue, QueueDrainer, SpoolQueue};
pub use reconcile::{Reconciler, RsvpTable, SentenceStyle};
pub use render::{DigestRenderer, RenderedDigest};
pub use snapshot::{BlobEventStore, BlobStore, EventStore, Snapshot, SnapshotLoader};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mode_senders() {
        let dev = Mode::Dev.sender("alert@example.com");
        assert_eq!(dev.from, "Game Knight DEV RSVP Alert <alert@example.com>");
        assert_eq!(dev.subject, "DEV RSVP Alert");

        let prod = Mode::Prod.sender("alert@example.com");
        assert_eq!(prod.from, "Game Knight RSVP Alert <alert@example.com>");
        assert_eq!(prod.subject, "RSVP Alert");
    }

    #[test]
    fn test_audience_names() {
        assert_eq!(Audience::All.as_str(), "rsvp_all");
        assert_eq!(Audience::AllWithHistory.as_str(), "rsvp_all_history");
        assert_eq!(Audience::Host.as_str(), "rsvp_hosted");
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(JobStatus::NoMessages.as_str(), "no_messages");
        assert_eq!(JobStatus::Dispatched.as_str(), "dispatched");
    }

    #[tokio::test]
    async fn test_from_config_opens_spool() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let vars = [
            ("RSVP_QUEUE_DIR", queue_dir.to_string_lossy().to_string()),
            ("EVENTS_SOURCE", dir.path().to_string_lossy().to_string()),
            ("BACKEND_SOURCE", dir.path().to_string_lossy().to_string()),
        ];
        let config = AlertConfig::from_lookup(|key| {
            vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
        })
        .unwrap();

        let job = AlertJob::from_config(&config, Arc::new(LogMailer::default()))
            .await
            .unwrap();
        let summary = job.run().await.unwrap();

        assert!(queue_dir.is_dir());
        assert_eq!(summary.status, JobStatus::NoMessages);
    }
}
