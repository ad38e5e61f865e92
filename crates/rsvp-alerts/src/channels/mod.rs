//! Outbound mail channels.

pub mod log;
pub mod smtp;

use async_trait::async_trait;

use crate::dispatch::OutboundEmail;
use crate::error::Result;

/// Trait for mail transports (SMTP relay, dry-run logger, etc.).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Get the name of this transport.
    fn name(&self) -> &'static str;

    /// Deliver one email.
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}
