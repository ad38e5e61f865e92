//! Snapshot loading: events, player directory, alert preferences and the
//! optional digest template, plus point lookups for events the snapshot
//! does not contain yet.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AlertError, Result};
use crate::model::{AlertPreferences, GameEvent, PlayerDirectory, RsvpLog};

/// Snapshot of every upcoming event.
pub const EVENTS_KEY: &str = "events.json";
/// Player directory with contact details.
pub const PLAYERS_KEY: &str = "players_groups.json";
/// Alert subscriptions.
pub const PREFERENCES_KEY: &str = "email_alert_preferences.json";
/// Digest HTML template.
pub const DEFAULT_TEMPLATE_KEY: &str = "rsvp_alert_template.html";

/// Fetch-by-key object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get a short description of this store for logs.
    fn describe(&self) -> String;

    /// Fetch a blob as UTF-8 text. Absent keys yield [`AlertError::NotFound`].
    async fn get(&self, key: &str) -> Result<String>;
}

/// Blobs stored as files under a root directory.
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AlertError::Other(format!("Invalid blob key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn get(&self, key: &str) -> Result<String> {
        let path = self.resolve(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AlertError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Blobs served over HTTP at `{base_url}/{key}`.
pub struct HttpBlobStore {
    base_url: String,
    client: Client,
}

impl HttpBlobStore {
    /// Create a store rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn get(&self, key: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, key.trim_start_matches('/'));
        debug!(url = %url, "Fetching blob");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(AlertError::NotFound(url));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Other(format!(
                "GET {url} returned {status}: {body}"
            )));
        }

        Ok(response.text().await?)
    }
}

/// Point lookup of a single event record.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, event_id: &str) -> Result<Option<GameEvent>>;
}

/// Event records kept as `{prefix}{event_id}.json` in a blob store.
///
/// The id comes off the queue and is percent-encoded into a single key
/// segment.
pub struct BlobEventStore {
    store: Arc<dyn BlobStore>,
    prefix: String,
}

impl BlobEventStore {
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl EventStore for BlobEventStore {
    async fn get_event(&self, event_id: &str) -> Result<Option<GameEvent>> {
        let key = format!("{}{}.json", self.prefix, urlencoding::encode(event_id));
        match self.store.get(&key).await {
            Ok(body) => {
                let mut event: GameEvent = serde_json::from_str(&body)?;
                event.strip_placeholders();
                Ok(Some(event))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Everything the reconciler and dispatcher read.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub events: HashMap<String, GameEvent>,
    pub players: PlayerDirectory,
    pub preferences: AlertPreferences,
    /// Digest template, when one is published
    pub template: Option<String>,
}

impl Snapshot {
    /// Build a snapshot from an event list.
    #[must_use]
    pub fn new(
        events: Vec<GameEvent>,
        players: PlayerDirectory,
        preferences: AlertPreferences,
        template: Option<String>,
    ) -> Self {
        Self {
            events: events
                .into_iter()
                .map(|event| (event.event_id.clone(), event))
                .collect(),
            players,
            preferences,
            template,
        }
    }

    /// Look up every event the logs reference but the snapshot lacks.
    ///
    /// Lookups run concurrently. Returns the ids that could not be found;
    /// logs for those events are skipped during reconciliation.
    pub async fn backfill_events(
        &mut self,
        logs: &[RsvpLog],
        store: &dyn EventStore,
    ) -> Vec<String> {
        let missing: BTreeSet<&str> = logs
            .iter()
            .map(|log| log.event_id.as_str())
            .filter(|id| !self.events.contains_key(*id))
            .collect();

        if missing.is_empty() {
            return vec![];
        }

        info!(count = missing.len(), "Retrieving events missing from snapshot");
        let lookups = missing.iter().map(|id| store.get_event(id));
        let results = join_all(lookups).await;

        let mut unresolved = vec![];
        for (id, result) in missing.into_iter().zip(results) {
            match result {
                Ok(Some(event)) => {
                    debug!(event_id = id, "Backfilled event");
                    self.events.insert(id.to_string(), event);
                }
                Ok(None) => {
                    warn!(event_id = id, "Event not found");
                    unresolved.push(id.to_string());
                }
                Err(e) => {
                    warn!(event_id = id, error = %e, "Event lookup failed");
                    unresolved.push(id.to_string());
                }
            }
        }
        unresolved
    }
}

/// Loads the snapshot blobs in parallel.
pub struct SnapshotLoader {
    events_store: Arc<dyn BlobStore>,
    backend_store: Arc<dyn BlobStore>,
    template_key: String,
}

impl SnapshotLoader {
    /// Events come from `events_store`; players, preferences and the
    /// template come from `backend_store`.
    #[must_use]
    pub fn new(events_store: Arc<dyn BlobStore>, backend_store: Arc<dyn BlobStore>) -> Self {
        Self {
            events_store,
            backend_store,
            template_key: DEFAULT_TEMPLATE_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn with_template_key(mut self, key: impl Into<String>) -> Self {
        self.template_key = key.into();
        self
    }

    /// Fetch and parse all snapshot blobs.
    ///
    /// Events, players and preferences are required. The template is
    /// optional and any failure to fetch it only drops back to the
    /// built-in template.
    pub async fn load(&self) -> Result<Snapshot> {
        let (events, players, preferences, template) = tokio::join!(
            fetch_json::<Vec<GameEvent>>(self.events_store.as_ref(), EVENTS_KEY),
            fetch_json::<PlayerDirectory>(self.backend_store.as_ref(), PLAYERS_KEY),
            fetch_json::<AlertPreferences>(self.backend_store.as_ref(), PREFERENCES_KEY),
            self.backend_store.get(&self.template_key),
        );

        let template = match template {
            Ok(body) => Some(body),
            Err(e) if e.is_not_found() => {
                debug!(key = %self.template_key, "No digest template published");
                None
            }
            Err(e) => {
                warn!(key = %self.template_key, error = %e, "Failed to fetch digest template");
                None
            }
        };

        let snapshot = Snapshot::new(events?, players?, preferences?, template);

        info!(
            events = snapshot.events.len(),
            players = snapshot.players.users.len(),
            rsvp_all = snapshot.preferences.rsvp_all.len(),
            rsvp_all_history = snapshot.preferences.rsvp_all_history.len(),
            rsvp_hosted = snapshot.preferences.rsvp_hosted.len(),
            custom_template = snapshot.template.is_some(),
            "Snapshot loaded"
        );

        Ok(snapshot)
    }
}

async fn fetch_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<T> {
    let body = store.get(key).await.inspect_err(|e| {
        warn!(store = %store.describe(), key, error = %e, "Failed to fetch snapshot blob");
    })?;
    serde_json::from_str(&body).map_err(|e| {
        warn!(store = %store.describe(), key, error = %e, "Failed to parse snapshot blob");
        AlertError::Serialization(e)
    })
}
