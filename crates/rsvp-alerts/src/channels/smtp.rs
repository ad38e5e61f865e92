//! SMTP relay transport.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use crate::channels::Mailer;
use crate::config::SmtpSettings;
use crate::dispatch::OutboundEmail;
use crate::error::{AlertError, Result};

/// Sends multipart (text + HTML) email through an SMTP relay with STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Create a mailer for the given relay.
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| AlertError::Email(format!("Failed to create SMTP transport: {e}")))?
            .port(settings.port);

        match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
            (None, None) => {}
            _ => warn!("SMTP_USERNAME and SMTP_PASSWORD must both be set, connecting without credentials"),
        }

        Ok(Self {
            transport: builder.build(),
        })
    }

    /// Build the MIME message for an email.
    pub fn build_message(email: &OutboundEmail) -> Result<Message> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e| AlertError::Email(format!("Invalid from address {}: {e}", email.from)))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| AlertError::Email(format!("Invalid recipient {}: {e}", email.to)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )
            .map_err(|e| AlertError::Email(format!("Failed to build email message: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        let message = Self::build_message(email)?;

        debug!(channel = "smtp", to = %email.to, "Sending email");

        self.transport
            .send(message)
            .await
            .map_err(|e| AlertError::Email(format!("SMTP delivery to {} failed: {e}", email.to)))?;

        debug!(channel = "smtp", to = %email.to, "Email sent successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Audience;

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            recipient_id: "u-1".to_string(),
            to: to.to_string(),
            from: "Game Knight RSVP Alert <alert@mail.cubesandcardboard.net>".to_string(),
            subject: "RSVP Alert".to_string(),
            audience: Audience::All,
            text_body: "Catan (Jan 5, 2025):\n  change\n".to_string(),
            html_body: "<h3>Catan (Jan 5, 2025)</h3>".to_string(),
        }
    }

    #[test]
    fn test_build_message_is_multipart() {
        let message = SmtpMailer::build_message(&email("alice@example.com")).unwrap();
        let formatted = String::from_utf8(message.formatted()).unwrap();

        assert!(formatted.contains("Subject: RSVP Alert"));
        assert!(formatted.contains("To: alice@example.com"));
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("text/plain"));
        assert!(formatted.contains("text/html"));
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let err = SmtpMailer::build_message(&email("not an address")).unwrap_err();
        assert!(matches!(err, AlertError::Email(_)));
    }
}
