//! Digest fan-out to the three subscriber classes.
//!
//! Planning decides who gets which digest and renders it; sending delivers
//! every planned email concurrently and isolates failures per recipient.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::channels::Mailer;
use crate::error::Result;
use crate::reconcile::Reconciliation;
use crate::render::{DigestRenderer, RenderedDigest};
use crate::snapshot::Snapshot;

/// Envelope sender and subject shared by every alert of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub from: String,
    pub subject: String,
}

/// Subscriber class an email was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// `rsvp_all`: net changes for every event
    All,
    /// `rsvp_all_history`: every change, then net changes
    AllWithHistory,
    /// `rsvp_hosted`: net changes for the recipient's own events
    Host,
}

impl Audience {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::All => "rsvp_all",
            Self::AllWithHistory => "rsvp_all_history",
            Self::Host => "rsvp_hosted",
        }
    }
}

/// One rendered email to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub recipient_id: String,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub audience: Audience,
    pub text_body: String,
    pub html_body: String,
}

/// Emails to send, plus subscribers that could not be addressed.
#[derive(Debug, Default)]
pub struct DispatchPlan {
    pub emails: Vec<OutboundEmail>,
    /// Subscriber ids without a directory entry or email address
    pub skipped: Vec<String>,
}

/// A delivery that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub recipient_id: String,
    pub audience: Audience,
    pub error: String,
}

/// Outcome of a fan-out.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: Vec<DeliveryFailure>,
    pub skipped: usize,
}

/// Plans and sends digest emails.
pub struct Dispatcher {
    mailer: Arc<dyn Mailer>,
    sender: Sender,
}

impl Dispatcher {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>, sender: Sender) -> Self {
        Self { mailer, sender }
    }

    /// Decide and render every email for this batch.
    pub fn plan(&self, reconciliation: &Reconciliation, snapshot: &Snapshot) -> Result<DispatchPlan> {
        let mut plan = DispatchPlan::default();
        let table = &reconciliation.table;
        if table.is_empty() {
            return Ok(plan);
        }

        let renderer = DigestRenderer::new(snapshot.template.as_deref(), self.sender.subject.as_str())?;
        let preferences = &snapshot.preferences;

        if !preferences.rsvp_all.is_empty() {
            let digest = renderer.render(table)?;
            for user_id in unique(&preferences.rsvp_all) {
                self.address(&mut plan, snapshot, user_id, Audience::All, &digest);
            }
        }

        if !preferences.rsvp_all_history.is_empty() {
            let digest = renderer.render_with_history(table, &reconciliation.history)?;
            for user_id in unique(&preferences.rsvp_all_history) {
                self.address(&mut plan, snapshot, user_id, Audience::AllWithHistory, &digest);
            }
        }

        for user_id in unique(&preferences.rsvp_hosted) {
            let hosted = table.hosted_by(user_id);
            if hosted.is_empty() {
                debug!(user_id, "No changes to hosted events");
                continue;
            }
            let digest = renderer.render(&hosted)?;
            self.address(&mut plan, snapshot, user_id, Audience::Host, &digest);
        }

        info!(
            emails = plan.emails.len(),
            skipped = plan.skipped.len(),
            "Dispatch planned"
        );
        Ok(plan)
    }

    fn address(
        &self,
        plan: &mut DispatchPlan,
        snapshot: &Snapshot,
        user_id: &str,
        audience: Audience,
        digest: &RenderedDigest,
    ) {
        let Some(to) = snapshot.players.email(user_id) else {
            warn!(user_id, audience = audience.as_str(), "Subscriber has no email address");
            plan.skipped.push(user_id.to_string());
            return;
        };

        plan.emails.push(OutboundEmail {
            recipient_id: user_id.to_string(),
            to: to.to_string(),
            from: self.sender.from.clone(),
            subject: self.sender.subject.clone(),
            audience,
            text_body: digest.text.clone(),
            html_body: digest.html.clone(),
        });
    }

    /// Send every email concurrently; one failure never blocks the others.
    pub async fn send(&self, emails: &[OutboundEmail]) -> DispatchReport {
        let channel = self.mailer.name();
        let results = join_all(emails.iter().map(|email| self.mailer.send(email))).await;

        let mut report = DispatchReport::default();
        for (email, result) in emails.iter().zip(results) {
            match result {
                Ok(()) => {
                    debug!(channel, user_id = %email.recipient_id, audience = email.audience.as_str(), "Alert sent");
                    report.sent += 1;
                }
                Err(e) => {
                    error!(
                        channel,
                        user_id = %email.recipient_id,
                        audience = email.audience.as_str(),
                        error = %e,
                        "Failed to send alert"
                    );
                    report.failed.push(DeliveryFailure {
                        recipient_id: email.recipient_id.clone(),
                        audience: email.audience,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            channel,
            sent = report.sent,
            failed = report.failed.len(),
            "Alerts dispatched"
        );
        report
    }

    /// Plan, then send.
    pub async fn dispatch(
        &self,
        reconciliation: &Reconciliation,
        snapshot: &Snapshot,
    ) -> Result<DispatchReport> {
        let plan = self.plan(reconciliation, snapshot)?;
        let mut report = self.send(&plan.emails).await;
        report.skipped = plan.skipped.len();
        Ok(report)
    }
}

/// Ids in first-seen order without repeats.
fn unique(ids: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(move |id| seen.insert(*id))
}
