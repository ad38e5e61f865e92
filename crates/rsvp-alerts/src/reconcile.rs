//! RSVP reconciliation.
//!
//! Folds a timestamp-ordered batch of RSVP logs into one net change per
//! (event, user) pair, and keeps a readable sentence for every individual
//! change along the way.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::model::{AuthType, GameEvent, PlayerDirectory, RsvpAction, RsvpLog, RsvpStatus};

/// Zone the game group lives in.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Denver;

/// Possessive pronoun used when a player has no override.
pub const DEFAULT_PRONOUN: &str = "their";

/// How timestamps, event labels and players are phrased.
#[derive(Debug, Clone)]
pub struct SentenceStyle {
    pub timezone: Tz,
    pub default_pronoun: String,
    /// Possessive pronoun per user id
    pub pronouns: HashMap<String, String>,
}

impl Default for SentenceStyle {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            default_pronoun: DEFAULT_PRONOUN.to_string(),
            pronouns: HashMap::new(),
        }
    }
}

impl SentenceStyle {
    /// `1/4/25, 3:00 PM` in the configured zone.
    #[must_use]
    pub fn timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format("%-m/%-d/%y, %-I:%M %p")
            .to_string()
    }

    /// `Jan 5, 2025` in the configured zone.
    #[must_use]
    pub fn event_date(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format("%b %-d, %Y")
            .to_string()
    }

    /// `Catan (Jan 5, 2025)`
    #[must_use]
    pub fn event_label(&self, event: &GameEvent) -> String {
        format!("{} ({})", event.game, self.event_date(event.date))
    }

    fn pronoun(&self, user_id: &str) -> &str {
        self.pronouns
            .get(user_id)
            .map_or(self.default_pronoun.as_str(), String::as_str)
    }
}

/// `James'` / `Alice's`
fn possessive(name: &str) -> String {
    if name.ends_with('s') {
        format!("{name}'")
    } else {
        format!("{name}'s")
    }
}

/// State a pair was in before this log applied, as far as the log tells.
const fn state_before(log: &RsvpLog) -> RsvpStatus {
    match log.action {
        RsvpAction::Add => RsvpStatus::Undecided,
        RsvpAction::Update => log.rsvp.opposite(),
        RsvpAction::Delete => log.rsvp,
    }
}

const fn state_after(log: &RsvpLog) -> RsvpStatus {
    match log.action {
        RsvpAction::Add | RsvpAction::Update => log.rsvp,
        RsvpAction::Delete => RsvpStatus::Undecided,
    }
}

/// Net RSVP change of one player for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RsvpChange {
    pub user_id: String,
    pub original: RsvpStatus,
    pub final_status: RsvpStatus,
    /// Summary of the net change, phrased after the latest log
    pub sentence: String,
}

/// Net changes for one event, in first-seen order of players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventChanges {
    pub event_id: String,
    pub host: String,
    pub label: String,
    pub changes: Vec<RsvpChange>,
}

/// Net changes for every event touched by the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RsvpTable {
    events: Vec<EventChanges>,
}

impl RsvpTable {
    #[must_use]
    pub fn new(events: Vec<EventChanges>) -> Self {
        Self { events }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events with at least one net change.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Number of (event, user) pairs with a net change.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.events.iter().map(|event| event.changes.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventChanges> {
        self.events.iter()
    }

    /// Subset of the table covering events hosted by `host`.
    #[must_use]
    pub fn hosted_by(&self, host: &str) -> Self {
        Self {
            events: self
                .events
                .iter()
                .filter(|event| event.host == host)
                .cloned()
                .collect(),
        }
    }
}

/// Every individual change sentence for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryGroup {
    pub label: String,
    pub sentences: Vec<String>,
}

/// Output of [`Reconciler::reconcile`].
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub table: RsvpTable,
    /// Includes changes whose pair netted out to nothing
    pub history: Vec<HistoryGroup>,
    /// Logs dropped because their event is unknown
    pub skipped: usize,
}

struct Phrase {
    subject: String,
    object: String,
}

struct EventFold {
    changes: EventChanges,
    history: Vec<String>,
    pairs: HashMap<String, usize>,
}

/// Reconciles RSVP logs against event and player records.
pub struct Reconciler<'a> {
    events: &'a HashMap<String, GameEvent>,
    players: &'a PlayerDirectory,
    style: &'a SentenceStyle,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        events: &'a HashMap<String, GameEvent>,
        players: &'a PlayerDirectory,
        style: &'a SentenceStyle,
    ) -> Self {
        Self {
            events,
            players,
            style,
        }
    }

    /// Fold `logs` (already in timestamp order) into net changes.
    ///
    /// The original state of a pair comes from the first log seen for it,
    /// the final state and sentence from the last. Pairs ending where they
    /// started are dropped, and so are events left without pairs.
    #[must_use]
    pub fn reconcile(&self, logs: &[RsvpLog]) -> Reconciliation {
        let mut folds: Vec<EventFold> = vec![];
        let mut by_event: HashMap<&str, usize> = HashMap::new();
        let mut skipped = 0;

        for log in logs {
            let Some(event) = self.events.get(&log.event_id) else {
                warn!(event_id = %log.event_id, user_id = %log.user_id, "Skipping RSVP for unknown event");
                skipped += 1;
                continue;
            };

            let slot = *by_event.entry(log.event_id.as_str()).or_insert_with(|| {
                folds.push(EventFold {
                    changes: EventChanges {
                        event_id: event.event_id.clone(),
                        host: event.host.clone(),
                        label: self.style.event_label(event),
                        changes: vec![],
                    },
                    history: vec![],
                    pairs: HashMap::new(),
                });
                folds.len() - 1
            });
            let fold = &mut folds[slot];

            let timestamp = self.style.timestamp(log.timestamp);
            let phrase = self.phrase(log);

            fold.history.push(sentence(
                &timestamp,
                &phrase,
                state_before(log),
                state_after(log),
            ));

            let pair = *fold.pairs.entry(log.user_id.clone()).or_insert_with(|| {
                fold.changes.changes.push(RsvpChange {
                    user_id: log.user_id.clone(),
                    original: state_before(log),
                    final_status: RsvpStatus::Undecided,
                    sentence: String::new(),
                });
                fold.changes.changes.len() - 1
            });
            let change = &mut fold.changes.changes[pair];
            change.final_status = state_after(log);
            change.sentence = sentence(&timestamp, &phrase, change.original, change.final_status);
        }

        let mut events = vec![];
        let mut history = vec![];
        for fold in folds {
            history.push(HistoryGroup {
                label: fold.changes.label.clone(),
                sentences: fold.history,
            });

            let mut changes = fold.changes;
            let event_id = &changes.event_id;
            changes.changes.retain(|change| {
                let moved = change.original != change.final_status;
                if !moved {
                    debug!(%event_id, user_id = %change.user_id, "RSVP netted out");
                }
                moved
            });
            if !changes.changes.is_empty() {
                events.push(changes);
            }
        }

        let table = RsvpTable::new(events);
        info!(
            logs = logs.len(),
            skipped,
            events = table.len(),
            changes = table.change_count(),
            "Reconciled RSVP logs"
        );

        Reconciliation {
            table,
            history,
            skipped,
        }
    }

    fn phrase(&self, log: &RsvpLog) -> Phrase {
        if !self.players.users.contains_key(&log.user_id) {
            warn!(user_id = %log.user_id, "Player missing from directory");
        }
        let player_name = self.players.given_name(&log.user_id);

        match log.auth_type {
            AuthType::SelfService => Phrase {
                subject: player_name.to_string(),
                object: self.style.pronoun(&log.user_id).to_string(),
            },
            AuthType::Host | AuthType::Admin => Phrase {
                subject: format!(
                    "{} ({})",
                    self.players.given_name(&log.auth_sub),
                    log.auth_type.as_str()
                ),
                object: possessive(player_name),
            },
        }
    }
}

fn sentence(timestamp: &str, phrase: &Phrase, from: RsvpStatus, to: RsvpStatus) -> String {
    let Phrase { subject, object } = phrase;
    if from == RsvpStatus::Undecided {
        format!("{timestamp}: {subject} marked {object} RSVP as \"{to}\"")
    } else {
        format!("{timestamp}: {subject} changed {object} RSVP from \"{from}\" to \"{to}\"")
    }
}
