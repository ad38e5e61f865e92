//! Dry-run transport that logs emails instead of sending them.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::channels::Mailer;
use crate::dispatch::OutboundEmail;
use crate::error::Result;

/// Logs every email it is asked to send.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        info!(
            channel = "log",
            to = %email.to,
            audience = email.audience.as_str(),
            subject = %email.subject,
            "Dry run, email not sent"
        );
        debug!(channel = "log", body = %email.text_body, "Dry run text body");
        Ok(())
    }
}
