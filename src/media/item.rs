use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::ClientType;

use super::payload::Details;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Season,
    Episode,
    Track,
    Album,
    Artist,
    Playlist,
    Collection,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Season => "season",
            MediaType::Episode => "episode",
            MediaType::Track => "track",
            MediaType::Album => "album",
            MediaType::Artist => "artist",
            MediaType::Playlist => "playlist",
            MediaType::Collection => "collection",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "movie" | "movies" => Some(MediaType::Movie),
            "series" | "show" | "shows" => Some(MediaType::Series),
            "season" | "seasons" => Some(MediaType::Season),
            "episode" | "episodes" => Some(MediaType::Episode),
            "track" | "tracks" => Some(MediaType::Track),
            "album" | "albums" => Some(MediaType::Album),
            "artist" | "artists" => Some(MediaType::Artist),
            "playlist" | "playlists" => Some(MediaType::Playlist),
            "collection" | "collections" => Some(MediaType::Collection),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain payload carried by a [`MediaItem`].
///
/// Every payload exposes the shared [`Details`] block so that sorting,
/// filtering and search can work without knowing the concrete type.
pub trait MediaData:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const MEDIA_TYPE: MediaType;

    fn details(&self) -> &Details;
    fn details_mut(&mut self) -> &mut Details;
}

/// One `(client, external id)` pair recording where an item is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncClient {
    pub client_id: i64,
    pub client_type: ClientType,
    pub item_id: String,
}

/// Set of sync pairs, at most one per client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncClients(Vec<SyncClient>);

impl SyncClients {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts the pair, replacing any existing entry for the same client.
    pub fn add_or_update(&mut self, client_id: i64, client_type: ClientType, item_id: impl Into<String>) {
        let item_id = item_id.into();
        if let Some(existing) = self.0.iter_mut().find(|s| s.client_id == client_id) {
            existing.client_type = client_type;
            existing.item_id = item_id;
            return;
        }
        self.0.push(SyncClient {
            client_id,
            client_type,
            item_id,
        });
    }

    pub fn get_item_id(&self, client_id: i64) -> Option<&str> {
        self.0
            .iter()
            .find(|s| s.client_id == client_id)
            .map(|s| s.item_id.as_str())
    }

    pub fn remove(&mut self, client_id: i64) -> bool {
        let before = self.0.len();
        self.0.retain(|s| s.client_id != client_id);
        before != self.0.len()
    }

    /// Merges `other` into `self`; entries in `other` win per client.
    pub fn merge(&mut self, other: &SyncClients) {
        for s in other.iter() {
            self.add_or_update(s.client_id, s.client_type, s.item_id.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncClient> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops duplicate client entries, keeping the last one seen.
    pub(crate) fn dedup(&mut self) {
        let mut out: Vec<SyncClient> = Vec::with_capacity(self.0.len());
        for s in self.0.drain(..) {
            if let Some(existing) = out.iter_mut().find(|e| e.client_id == s.client_id) {
                *existing = s;
            } else {
                out.push(s);
            }
        }
        self.0 = out;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem<T> {
    pub id: i64,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub sync_clients: SyncClients,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    #[serde(default)]
    pub version: i64,
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<T: MediaData> MediaItem<T> {
    /// A transient item (id 0) not yet persisted.
    pub fn new(data: T) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            media_type: T::MEDIA_TYPE,
            sync_clients: SyncClients::new(),
            owner_id: None,
            version: 0,
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// A transient item that came from `client_id` under `external_id`.
    pub fn from_client(client_id: i64, client_type: ClientType, external_id: impl Into<String>, data: T) -> Self {
        let mut item = Self::new(data);
        item.sync_clients.add_or_update(client_id, client_type, external_id);
        item
    }

    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.id == 0
    }

    pub fn title(&self) -> &str {
        &self.data.details().title
    }

    /// Checks the type tag against the payload type.
    pub fn validate(&self) -> Result<(), MediaItemError> {
        if self.media_type != T::MEDIA_TYPE {
            return Err(MediaItemError::TypeMismatch {
                expected: T::MEDIA_TYPE,
                found: self.media_type,
            });
        }
        Ok(())
    }

    /// External id of this item on `client_id`, if known.
    pub fn client_item_id(&self, client_id: i64) -> Option<&str> {
        self.sync_clients.get_item_id(client_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaItemError {
    #[error("media type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: MediaType, found: MediaType },
}
