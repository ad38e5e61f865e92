//! Records exchanged with the game-scheduling backend.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Member the record store keeps in otherwise empty sets.
pub const PLACEHOLDER_MEMBER: &str = "placeholder";

/// RSVP state of a player for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Attending,
    NotAttending,
    /// No RSVP on record
    Undecided,
}

impl RsvpStatus {
    /// Human-readable label used in sentences.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Attending => "attending",
            Self::NotAttending => "not attending",
            Self::Undecided => "undecided",
        }
    }

    /// The state an `update` flipped away from.
    ///
    /// Only attending and not attending toggle; undecided maps to itself.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Attending => Self::NotAttending,
            Self::NotAttending => Self::Attending,
            Self::Undecided => Self::Undecided,
        }
    }
}

impl fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What happened to an RSVP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsvpAction {
    /// A first RSVP was recorded
    Add,
    /// An existing RSVP flipped to the other value
    Update,
    /// An RSVP was withdrawn
    Delete,
}

/// Who made the change, relative to the player whose RSVP changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// The player changed their own RSVP
    #[serde(rename = "self")]
    SelfService,
    /// The event host changed it
    Host,
    /// An administrator changed it
    Admin,
}

impl AuthType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SelfService => "self",
            Self::Host => "host",
            Self::Admin => "admin",
        }
    }
}

/// One RSVP mutation as published on the change queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsvpLog {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,
    /// Event date at the time of the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub action: RsvpAction,
    /// Acting user
    pub auth_sub: String,
    pub auth_type: AuthType,
    pub event_id: String,
    /// Player whose RSVP changed
    pub user_id: String,
    /// Value the action applied to; `undecided` is rejected on the wire
    #[serde(deserialize_with = "deserialize_wire_rsvp")]
    pub rsvp: RsvpStatus,
}

/// Only attending and not attending are published; undecided is the
/// absence of a record, never a value.
fn deserialize_wire_rsvp<'de, D>(deserializer: D) -> Result<RsvpStatus, D::Error>
where
    D: Deserializer<'de>,
{
    match RsvpStatus::deserialize(deserializer)? {
        RsvpStatus::Undecided => Err(de::Error::invalid_value(
            de::Unexpected::Str("undecided"),
            &"attending or not_attending",
        )),
        status => Ok(status),
    }
}

/// A scheduled game night.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    pub event_id: String,
    pub date: DateTime<Utc>,
    pub host: String,
    pub game: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub attending: Vec<String>,
    #[serde(default)]
    pub not_attending: Vec<String>,
    #[serde(default)]
    pub player_pool: Vec<String>,
    #[serde(default)]
    pub organizer_pool: Vec<String>,
}

impl GameEvent {
    /// Drop the record store's placeholder member from every roster.
    pub fn strip_placeholders(&mut self) {
        for roster in [
            &mut self.attending,
            &mut self.not_attending,
            &mut self.player_pool,
            &mut self.organizer_pool,
        ] {
            roster.retain(|member| member != PLACEHOLDER_MEMBER);
        }
    }
}

/// Contact attributes of a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAttrib {
    pub given_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// A player directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    #[serde(default)]
    pub groups: Vec<String>,
    pub attrib: PlayerAttrib,
}

/// Player directory snapshot (`players_groups.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDirectory {
    #[serde(rename = "Users")]
    pub users: HashMap<String, Player>,
    #[serde(rename = "Groups", default)]
    pub groups: HashMap<String, Vec<String>>,
}

impl PlayerDirectory {
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&Player> {
        self.users.get(user_id)
    }

    /// Given name of a player, or the raw id when the player is unknown.
    #[must_use]
    pub fn given_name<'a>(&'a self, user_id: &'a str) -> &'a str {
        self.users
            .get(user_id)
            .map_or(user_id, |player| player.attrib.given_name.as_str())
    }

    /// Email address of a player, if one is on file.
    #[must_use]
    pub fn email(&self, user_id: &str) -> Option<&str> {
        self.users
            .get(user_id)
            .map(|player| player.attrib.email.trim())
            .filter(|email| !email.is_empty())
    }
}

/// Alert subscriptions (`email_alert_preferences.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPreferences {
    /// Net change digest for every event
    #[serde(default)]
    pub rsvp_all: Vec<String>,
    /// Net change digest preceded by every individual change
    #[serde(default)]
    pub rsvp_all_history: Vec<String>,
    /// Net change digest limited to events the subscriber hosts
    #[serde(default)]
    pub rsvp_hosted: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsvp_log_parses_queue_body() {
        let body = r#"{
            "timestamp": "2025-01-04T22:00:00.000Z",
            "log_type": "rsvp",
            "date": "2025-01-06T01:00:00.000Z",
            "action": "update",
            "auth_sub": "u-host",
            "auth_type": "self",
            "event_id": "e-1",
            "user_id": "u-1",
            "rsvp": "not_attending",
            "extra": "ignored"
        }"#;

        let log: RsvpLog = serde_json::from_str(body).unwrap();
        assert_eq!(log.action, RsvpAction::Update);
        assert_eq!(log.auth_type, AuthType::SelfService);
        assert_eq!(log.rsvp, RsvpStatus::NotAttending);
        assert_eq!(log.log_type.as_deref(), Some("rsvp"));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let body = r#"{"timestamp":"2025-01-04T22:00:00Z","action":"modify","auth_sub":"a",
            "auth_type":"admin","event_id":"e","user_id":"u","rsvp":"attending"}"#;
        assert!(serde_json::from_str::<RsvpLog>(body).is_err());
    }

    #[test]
    fn test_undecided_rsvp_is_rejected() {
        let body = r#"{"timestamp":"2025-01-04T22:00:00Z","action":"update","auth_sub":"a",
            "auth_type":"self","event_id":"e","user_id":"u","rsvp":"undecided"}"#;
        let err = serde_json::from_str::<RsvpLog>(body).unwrap_err();
        assert!(err.to_string().contains("undecided"));
    }

    #[test]
    fn test_status_labels_and_opposites() {
        assert_eq!(RsvpStatus::NotAttending.label(), "not attending");
        assert_eq!(RsvpStatus::Attending.opposite(), RsvpStatus::NotAttending);
        assert_eq!(RsvpStatus::NotAttending.opposite(), RsvpStatus::Attending);
        assert_eq!(RsvpStatus::Undecided.opposite(), RsvpStatus::Undecided);
    }

    #[test]
    fn test_strip_placeholders() {
        let mut event: GameEvent = serde_json::from_str(
            r#"{"event_id":"e","date":"2025-01-06T01:00:00Z","host":"h","game":"Catan",
                "attending":["placeholder","u-1"],"player_pool":["placeholder"]}"#,
        )
        .unwrap();
        event.strip_placeholders();
        assert_eq!(event.attending, vec!["u-1".to_string()]);
        assert!(event.player_pool.is_empty());
    }

    #[test]
    fn test_directory_lookup_falls_back_to_id() {
        let directory: PlayerDirectory = serde_json::from_str(
            r#"{"Users":{"u-1":{"groups":[],"attrib":{"given_name":"Alice","email":" "}}}}"#,
        )
        .unwrap();
        assert_eq!(directory.given_name("u-1"), "Alice");
        assert_eq!(directory.given_name("u-9"), "u-9");
        assert_eq!(directory.email("u-1"), None);
        assert!(directory.groups.is_empty());
    }
}
