//! Configuration for the RSVP alert job.

use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dispatch::Sender;
use crate::error::{AlertError, Result};
use crate::queue::DEFAULT_PAGE_SIZE;
use crate::reconcile::{SentenceStyle, DEFAULT_PRONOUN};
use crate::snapshot::{BlobStore, DirectoryBlobStore, HttpBlobStore, DEFAULT_TEMPLATE_KEY};

/// Default sender address.
pub const DEFAULT_FROM_ADDRESS: &str = "alert@mail.cubesandcardboard.net";

/// Default SMTP port (STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Alert subject outside production.
pub const DEV_SUBJECT: &str = "DEV RSVP Alert";

/// Alert subject in production.
pub const PROD_SUBJECT: &str = "RSVP Alert";

/// Default key prefix for event point lookups.
pub const DEFAULT_EVENT_RECORDS_PREFIX: &str = "events/";

/// Deployment flavour; changes how alerts introduce themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dev,
    Prod,
}

impl Mode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" | "" => Ok(Self::Prod),
            other => Err(AlertError::Config(format!("Unknown ALERT_MODE: {other}"))),
        }
    }

    /// Mode named by `ALERT_MODE`, defaulting to prod.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        lookup("ALERT_MODE")
            .filter(|v| !v.trim().is_empty())
            .map(|v| Self::parse(&v))
            .transpose()
            .map(|mode| mode.unwrap_or(Self::Prod))
    }

    /// Subject line, also used as the digest title.
    #[must_use]
    pub const fn subject(&self) -> &'static str {
        match self {
            Self::Dev => DEV_SUBJECT,
            Self::Prod => PROD_SUBJECT,
        }
    }

    /// Sender identity for this mode.
    #[must_use]
    pub fn sender(&self, from_address: &str) -> Sender {
        Sender {
            from: format!("Game Knight {} <{from_address}>", self.subject()),
            subject: self.subject().to_string(),
        }
    }
}

/// Where a blob store lives: an HTTP(S) base URL or a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Http(String),
    Directory(PathBuf),
}

impl StoreLocation {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            Self::Http(value.to_string())
        } else {
            Self::Directory(PathBuf::from(value))
        }
    }

    /// Open a blob store at this location.
    pub fn open(&self) -> Result<Arc<dyn BlobStore>> {
        Ok(match self {
            Self::Http(url) => Arc::new(HttpBlobStore::new(url.clone())?),
            Self::Directory(dir) => Arc::new(DirectoryBlobStore::new(dir.clone())),
        })
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Configuration for one run of the alert job.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub mode: Mode,
    /// Spool directory holding RSVP change messages.
    pub queue_dir: PathBuf,
    /// Source of `events.json`.
    pub events_source: StoreLocation,
    /// Source of players, preferences and the digest template.
    pub backend_source: StoreLocation,
    /// Source for point lookups of events missing from the snapshot.
    pub event_records_source: StoreLocation,
    pub event_records_prefix: String,
    pub template_key: String,
    pub page_size: usize,
    pub style: SentenceStyle,
    pub from_address: String,
    /// Unset means mail cannot be sent (dry runs only).
    pub smtp: Option<SmtpSettings>,
}

impl AlertConfig {
    /// Create configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `RSVP_QUEUE_DIR`: spool directory of RSVP change messages
    /// - `EVENTS_SOURCE`: URL or directory holding `events.json`
    /// - `BACKEND_SOURCE`: URL or directory holding players and preferences
    ///
    /// # Optional Environment Variables
    /// - `ALERT_MODE`: `dev` or `prod` (default: prod)
    /// - `EVENT_RECORDS_SOURCE` / `EVENT_RECORDS_PREFIX`: event point lookups
    /// - `ALERT_TEMPLATE_KEY`: digest template key
    /// - `ALERT_PAGE_SIZE`: messages per receive (default: 10)
    /// - `ALERT_TIMEZONE`: IANA zone for timestamps (default: America/Denver)
    /// - `ALERT_DEFAULT_PRONOUN` / `ALERT_PRONOUNS` (`user_id:pronoun,...`)
    /// - `ALERT_FROM_ADDRESS`, `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`,
    ///   `SMTP_PASSWORD`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| {
                AlertError::Config(format!("{key} environment variable not set"))
            })
        };

        let mode = Mode::from_lookup(&lookup)?;

        let queue_dir = PathBuf::from(require("RSVP_QUEUE_DIR")?);
        let events_raw = require("EVENTS_SOURCE")?;
        let events_source = StoreLocation::parse(&events_raw);
        let backend_source = StoreLocation::parse(&require("BACKEND_SOURCE")?);
        let event_records_source =
            StoreLocation::parse(&get("EVENT_RECORDS_SOURCE").unwrap_or(events_raw));

        let page_size = match get("ALERT_PAGE_SIZE") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| AlertError::Config(format!("Invalid ALERT_PAGE_SIZE: {v}")))?,
            None => DEFAULT_PAGE_SIZE,
        };

        let style = SentenceStyle::from_lookup(&lookup)?;

        let smtp = match get("SMTP_HOST") {
            Some(host) => {
                let port = match get("SMTP_PORT") {
                    Some(v) => v
                        .trim()
                        .parse()
                        .map_err(|_| AlertError::Config(format!("Invalid SMTP_PORT: {v}")))?,
                    None => DEFAULT_SMTP_PORT,
                };
                Some(SmtpSettings {
                    host,
                    port,
                    username: get("SMTP_USERNAME"),
                    password: get("SMTP_PASSWORD"),
                })
            }
            None => None,
        };

        Ok(Self {
            mode,
            queue_dir,
            events_source,
            backend_source,
            event_records_source,
            event_records_prefix: lookup("EVENT_RECORDS_PREFIX")
                .unwrap_or_else(|| DEFAULT_EVENT_RECORDS_PREFIX.to_string()),
            template_key: get("ALERT_TEMPLATE_KEY")
                .unwrap_or_else(|| DEFAULT_TEMPLATE_KEY.to_string()),
            page_size,
            style,
            from_address: get("ALERT_FROM_ADDRESS")
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            smtp,
        })
    }

    /// Sender identity for outgoing alerts.
    #[must_use]
    pub fn sender(&self) -> Sender {
        self.mode.sender(&self.from_address)
    }
}

impl SentenceStyle {
    /// Style from `ALERT_TIMEZONE`, `ALERT_DEFAULT_PRONOUN` and
    /// `ALERT_PRONOUNS`, with defaults for anything unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut style = Self::default();
        if let Some(zone) = get("ALERT_TIMEZONE") {
            style.timezone = zone
                .trim()
                .parse::<Tz>()
                .map_err(|e| AlertError::Config(format!("Invalid ALERT_TIMEZONE {zone}: {e}")))?;
        }
        style.default_pronoun =
            get("ALERT_DEFAULT_PRONOUN").unwrap_or_else(|| DEFAULT_PRONOUN.to_string());
        if let Some(raw) = get("ALERT_PRONOUNS") {
            style.pronouns = parse_pronouns(&raw)?;
        }
        Ok(style)
    }
}

/// Parse `user_id:pronoun,user_id:pronoun`.
fn parse_pronouns(raw: &str) -> Result<HashMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(user, pronoun)| (user.trim().to_string(), pronoun.trim().to_string()))
                .filter(|(user, pronoun)| !user.is_empty() && !pronoun.is_empty())
                .ok_or_else(|| AlertError::Config(format!("Invalid ALERT_PRONOUNS entry: {entry}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("RSVP_QUEUE_DIR", "/var/spool/rsvp"),
        ("EVENTS_SOURCE", "https://snapshots.example.com/public"),
        ("BACKEND_SOURCE", "/srv/backend"),
    ];

    #[test]
    fn test_defaults() {
        let config = AlertConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.mode, Mode::Prod);
        assert_eq!(config.queue_dir, PathBuf::from("/var/spool/rsvp"));
        assert_eq!(
            config.events_source,
            StoreLocation::Http("https://snapshots.example.com/public".to_string())
        );
        assert_eq!(
            config.backend_source,
            StoreLocation::Directory(PathBuf::from("/srv/backend"))
        );
        assert_eq!(config.event_records_source, config.events_source);
        assert_eq!(config.event_records_prefix, DEFAULT_EVENT_RECORDS_PREFIX);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.style.timezone, chrono_tz::America::Denver);
        assert_eq!(config.style.default_pronoun, "their");
        assert!(config.smtp.is_none());
        assert_eq!(config.sender().subject, "RSVP Alert");
        assert_eq!(
            config.sender().from,
            "Game Knight RSVP Alert <alert@mail.cubesandcardboard.net>"
        );
    }

    #[test]
    fn test_missing_required_variable() {
        let err = AlertConfig::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("BACKEND_SOURCE"));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("ALERT_MODE", "dev"),
            ("ALERT_PAGE_SIZE", "5"),
            ("ALERT_TIMEZONE", "America/New_York"),
            ("ALERT_PRONOUNS", "u-1:her, u-2:his"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "mailer"),
            ("EVENT_RECORDS_PREFIX", ""),
        ]);

        let config = AlertConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.mode, Mode::Dev);
        assert_eq!(config.page_size, 5);
        assert_eq!(config.style.timezone, chrono_tz::America::New_York);
        assert_eq!(config.style.pronouns["u-1"], "her");
        assert_eq!(config.style.pronouns["u-2"], "his");
        assert_eq!(config.event_records_prefix, "");
        let smtp = config.smtp.clone().unwrap();
        assert_eq!(smtp.port, DEFAULT_SMTP_PORT);
        assert_eq!(smtp.username.as_deref(), Some("mailer"));
        assert!(smtp.password.is_none());
        assert_eq!(config.sender().subject, "DEV RSVP Alert");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("ALERT_MODE", "staging"),
            ("ALERT_PAGE_SIZE", "0"),
            ("ALERT_TIMEZONE", "Mars/Olympus"),
            ("ALERT_PRONOUNS", "u-1"),
            ("SMTP_PORT", "not-a-port"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push(("SMTP_HOST", "smtp.example.com"));
            vars.push((key, value));
            assert!(
                matches!(
                    AlertConfig::from_lookup(lookup(&vars)),
                    Err(AlertError::Config(_))
                ),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_style_reads_without_job_settings() {
        let style = SentenceStyle::from_lookup(lookup(&[
            ("ALERT_TIMEZONE", "UTC"),
            ("ALERT_DEFAULT_PRONOUN", "the"),
            ("ALERT_PRONOUNS", "u-1:her"),
        ]))
        .unwrap();

        assert_eq!(style.timezone, chrono_tz::UTC);
        assert_eq!(style.default_pronoun, "the");
        assert_eq!(style.pronouns["u-1"], "her");

        let defaults = SentenceStyle::from_lookup(lookup(&[])).unwrap();
        assert_eq!(defaults.timezone, chrono_tz::America::Denver);
        assert_eq!(defaults.default_pronoun, "their");
    }

    #[test]
    fn test_mode_lookup_and_subjects() {
        assert_eq!(Mode::from_lookup(lookup(&[])).unwrap(), Mode::Prod);
        assert_eq!(Mode::from_lookup(lookup(&[("ALERT_MODE", "dev")])).unwrap(), Mode::Dev);
        assert_eq!(Mode::Dev.subject(), DEV_SUBJECT);
        assert_eq!(Mode::Prod.subject(), PROD_SUBJECT);
    }
}
