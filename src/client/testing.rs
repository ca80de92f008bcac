//! In-memory providers for service and router tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::media::*;

use super::config::{Capabilities, ClientConfig, ClientType};
use super::error::{ProviderError, ProviderResult};
use super::factory::ClientFactory;
use super::provider::{Provider, WatchHistoryEntry};

/// Backing data of one fake client, shared by every adapter built for it.
#[derive(Default)]
pub struct FakeState {
    pub movies: Mutex<Vec<(String, Movie)>>,
    pub tracks: Mutex<Vec<(String, Track)>>,
    pub playlists: Mutex<BTreeMap<String, (Details, Vec<String>)>>,
    pub history: Mutex<Vec<(String, String, MediaType, DateTime<Utc>)>>,
    pub fail: AtomicBool,
    pub fail_adds: AtomicBool,
    pub delay_ms: AtomicU64,
    pub calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeState {
    pub fn add_movie(&self, id: &str, title: &str, rating: Option<f32>) {
        let mut details = Details::titled(title);
        details.community_rating = rating;
        if let Ok(mut movies) = self.movies.lock() {
            movies.push((id.to_string(), Movie { details, ..Default::default() }));
        }
    }

    pub fn set_cast(&self, id: &str, actors: &[&str]) {
        if let Ok(mut movies) = self.movies.lock() {
            if let Some((_, movie)) = movies.iter_mut().find(|(mid, _)| mid == id) {
                movie.cast = actors
                    .iter()
                    .map(|name| Person {
                        name: name.to_string(),
                        role: Some("Actor".to_string()),
                        character: None,
                    })
                    .collect();
            }
        }
    }

    pub fn add_track(&self, id: &str, title: &str) {
        if let Ok(mut tracks) = self.tracks.lock() {
            tracks.push((
                id.to_string(),
                Track {
                    details: Details::titled(title),
                    ..Default::default()
                },
            ));
        }
    }

    pub fn add_playlist(&self, id: &str, name: &str, items: &[&str]) {
        if let Ok(mut playlists) = self.playlists.lock() {
            playlists.insert(
                id.to_string(),
                (Details::titled(name), items.iter().map(|s| s.to_string()).collect()),
            );
        }
    }

    pub fn add_history(&self, id: &str, title: &str, media_type: MediaType, played_at: DateTime<Utc>) {
        if let Ok(mut history) = self.history.lock() {
            history.push((id.to_string(), title.to_string(), media_type, played_at));
        }
    }

    pub fn playlist_items(&self, id: &str) -> Vec<String> {
        self.playlists
            .lock()
            .ok()
            .and_then(|p| p.get(id).map(|(_, items)| items.clone()))
            .unwrap_or_default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Only adding items to playlists fails.
    pub fn set_failing_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn playlist_count(&self) -> usize {
        self.playlists.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Maps client names to fake state; builds adapters for every client type.
#[derive(Clone, Default)]
pub struct FakeRegistry {
    states: Arc<Mutex<HashMap<String, Arc<FakeState>>>>,
}

impl FakeRegistry {
    /// Clients configured with this api key fail to build.
    pub const FAIL_TO_BUILD: &'static str = "fail-to-build";

    pub fn state(&self, name: &str) -> Arc<FakeState> {
        let mut states = self.states.lock().expect("fake registry poisoned");
        states.entry(name.to_string()).or_default().clone()
    }

    pub fn install(&self, factory: &ClientFactory) {
        for client_type in [
            ClientType::Plex,
            ClientType::Jellyfin,
            ClientType::Emby,
            ClientType::Subsonic,
            ClientType::Tmdb,
            ClientType::Radarr,
            ClientType::Sonarr,
            ClientType::Lidarr,
        ] {
            let registry = self.clone();
            factory.register(
                client_type,
                Arc::new(move |cfg: &ClientConfig, _: reqwest::Client| {
                    if cfg.settings.api_key.as_deref() == Some(Self::FAIL_TO_BUILD) {
                        return Err(ProviderError::InvalidConfig("refusing to build".to_string()));
                    }
                    Ok::<_, ProviderError>(Arc::new(FakeProvider {
                        client_id: cfg.id,
                        client_type: cfg.client_type,
                        capabilities: cfg.capabilities(),
                        state: registry.state(&cfg.name),
                    }) as Arc<dyn Provider>)
                }),
            );
        }
    }
}

pub struct FakeProvider {
    client_id: i64,
    client_type: ClientType,
    capabilities: Capabilities,
    state: Arc<FakeState>,
}

impl FakeProvider {
    async fn enter(&self) -> ProviderResult<()> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    fn wrap<T: MediaData>(&self, id: &str, data: T) -> MediaItem<T> {
        MediaItem::from_client(self.client_id, self.client_type, id, data)
    }

    fn playlist(&self, id: &str) -> ProviderResult<MediaItem<Playlist>> {
        let playlists = self.state.playlists.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        let (details, items) = playlists
            .get(id)
            .ok_or_else(|| ProviderError::NotFound(format!("playlist {}", id)))?;
        Ok(self.wrap(
            id,
            Playlist {
                details: details.clone(),
                list: ListData::from_item_ids(items.iter().cloned()),
            },
        ))
    }

    fn edit_playlist<R>(&self, id: &str, f: impl FnOnce(&mut Vec<String>) -> ProviderResult<R>) -> ProviderResult<R> {
        let mut playlists = self.state.playlists.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        let (_, items) = playlists
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("playlist {}", id)))?;
        f(items)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn client_id(&self) -> i64 {
        self.client_id
    }

    fn client_type(&self) -> ClientType {
        self.client_type
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        self.enter().await
    }

    async fn get_movies(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Movie>>> {
        self.enter().await?;
        let movies = self.state.movies.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        Ok(movies
            .iter()
            .map(|(id, m)| self.wrap(id, m.clone()))
            .filter(|m| options.matches(m.data.details()) && options.matches_people(&m.data.cast, &m.data.crew))
            .collect())
    }

    async fn get_movie(&self, id: &str) -> ProviderResult<MediaItem<Movie>> {
        self.enter().await?;
        let movies = self.state.movies.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        movies
            .iter()
            .find(|(mid, _)| mid == id)
            .map(|(mid, m)| self.wrap(mid, m.clone()))
            .ok_or_else(|| ProviderError::NotFound(format!("movie {}", id)))
    }

    async fn get_tracks(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Track>>> {
        self.enter().await?;
        let tracks = self.state.tracks.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        Ok(tracks
            .iter()
            .map(|(id, t)| self.wrap(id, t.clone()))
            .filter(|t| options.matches(t.data.details()))
            .collect())
    }

    async fn get_track(&self, id: &str) -> ProviderResult<MediaItem<Track>> {
        self.enter().await?;
        let tracks = self.state.tracks.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        tracks
            .iter()
            .find(|(tid, _)| tid == id)
            .map(|(tid, t)| self.wrap(tid, t.clone()))
            .ok_or_else(|| ProviderError::NotFound(format!("track {}", id)))
    }

    async fn get_playlists(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Playlist>>> {
        self.enter().await?;
        let ids: Vec<String> = self
            .state
            .playlists
            .lock()
            .map_err(|_| ProviderError::Api("poisoned".to_string()))?
            .keys()
            .cloned()
            .collect();
        ids.iter().map(|id| self.playlist(id)).collect()
    }

    async fn get_playlist(&self, id: &str) -> ProviderResult<MediaItem<Playlist>> {
        self.enter().await?;
        self.playlist(id)
    }

    async fn create_playlist(&self, name: &str, description: &str) -> ProviderResult<MediaItem<Playlist>> {
        self.enter().await?;
        let id = format!("pl-{}", self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut details = Details::titled(name);
        details.description = description.to_string();
        if let Ok(mut playlists) = self.state.playlists.lock() {
            playlists.insert(id.clone(), (details, Vec::new()));
        }
        self.playlist(&id)
    }

    async fn update_playlist(&self, id: &str, name: &str, description: &str) -> ProviderResult<()> {
        self.enter().await?;
        let mut playlists = self.state.playlists.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        let (details, _) = playlists
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("playlist {}", id)))?;
        details.title = name.to_string();
        details.description = description.to_string();
        Ok(())
    }

    async fn delete_playlist(&self, id: &str) -> ProviderResult<()> {
        self.enter().await?;
        let mut playlists = self.state.playlists.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        playlists
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("playlist {}", id)))
    }

    async fn add_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        self.enter().await?;
        if self.state.fail_adds.load(Ordering::SeqCst) {
            return Err(ProviderError::Api("add rejected".to_string()));
        }
        self.edit_playlist(id, |items| {
            items.push(item_id.to_string());
            Ok(())
        })
    }

    async fn remove_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        self.enter().await?;
        self.edit_playlist(id, |items| {
            let pos = items
                .iter()
                .position(|i| i == item_id)
                .ok_or_else(|| ProviderError::NotFound(format!("item {}", item_id)))?;
            items.remove(pos);
            Ok(())
        })
    }

    async fn reorder_playlist_items(&self, id: &str, item_ids: &[String]) -> ProviderResult<()> {
        self.enter().await?;
        self.edit_playlist(id, |items| {
            *items = item_ids.to_vec();
            Ok(())
        })
    }

    async fn get_play_history(&self, options: &QueryOptions) -> ProviderResult<Vec<WatchHistoryEntry>> {
        self.enter().await?;
        let history = self.state.history.lock().map_err(|_| ProviderError::Api("poisoned".to_string()))?;
        let mut entries: Vec<WatchHistoryEntry> = history
            .iter()
            .map(|(id, title, media_type, played_at)| WatchHistoryEntry {
                client_id: self.client_id,
                media_type: *media_type,
                item_id: id.clone(),
                title: title.clone(),
                played_at: Some(*played_at),
                play_count: 1,
            })
            .collect();
        entries.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        if let Some(limit) = options.provider_limit() {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}
