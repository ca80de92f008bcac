//! Plex Media Server adapter.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::media::*;

use super::config::{Capabilities, ClientConfig, ClientType};
use super::error::{check_response, json_response, ProviderError, ProviderResult};
use super::provider::{Provider, WatchHistoryEntry};

const X_PLEX_TOKEN: &str = "X-Plex-Token";

// Plex library item type codes.
const TYPE_MOVIE: i32 = 1;
const TYPE_SHOW: i32 = 2;
const TYPE_ARTIST: i32 = 8;
const TYPE_ALBUM: i32 = 9;
const TYPE_TRACK: i32 = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Tag {
    pub tag: String,
    pub role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GuidRef {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub rating_key: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    pub summary: Option<String>,
    pub year: Option<i32>,
    pub originally_available_at: Option<String>,
    pub added_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub rating: Option<f32>,
    pub audience_rating: Option<f32>,
    pub user_rating: Option<f32>,
    pub content_rating: Option<String>,
    /// Milliseconds.
    pub duration: Option<i64>,
    pub studio: Option<String>,
    pub thumb: Option<String>,
    pub art: Option<String>,
    #[serde(rename = "Genre")]
    pub genres: Vec<Tag>,
    #[serde(rename = "Role")]
    pub roles: Vec<Tag>,
    #[serde(rename = "Director")]
    pub directors: Vec<Tag>,
    #[serde(rename = "Guid")]
    pub guids: Vec<GuidRef>,
    pub parent_rating_key: Option<String>,
    pub parent_title: Option<String>,
    pub parent_index: Option<i32>,
    pub grandparent_rating_key: Option<String>,
    pub grandparent_title: Option<String>,
    pub index: Option<i32>,
    pub leaf_count: Option<i32>,
    pub child_count: Option<i32>,
    #[serde(rename = "playlistItemID")]
    pub playlist_item_id: Option<i64>,
    pub view_count: Option<i32>,
    pub viewed_at: Option<i64>,
    pub last_viewed_at: Option<i64>,
    pub playlist_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Directory {
    pub key: String,
    #[serde(rename = "type")]
    pub section_type: String,
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaContainer {
    pub machine_identifier: Option<String>,
    #[serde(rename = "Metadata")]
    pub metadata: Vec<Metadata>,
    #[serde(rename = "Directory")]
    pub directories: Vec<Directory>,
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "MediaContainer")]
    pub container: MediaContainer,
}

fn from_unix(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
}

impl Metadata {
    fn details(&self, host: &str) -> Details {
        let mut d = Details::titled(self.title.clone());
        d.description = self.summary.clone().unwrap_or_default();
        d.set_release_date(self.originally_available_at.as_deref().and_then(Details::parse_date));
        if d.release_year.is_none() {
            d.release_year = self.year;
        }
        d.genres = self.genres.iter().map(|g| g.tag.clone()).collect();
        d.studios = self.studio.iter().cloned().collect();
        d.content_rating = self.content_rating.clone();
        d.community_rating = self.audience_rating.or(self.rating);
        d.user_rating = self.user_rating;
        d.duration = self.duration.map(|ms| ms / 1000);
        d.added_at = from_unix(self.added_at);
        d.updated_at = from_unix(self.updated_at);
        d.artwork.poster = self.thumb.as_ref().map(|t| format!("{}{}", host, t));
        d.artwork.backdrop = self.art.as_ref().map(|a| format!("{}{}", host, a));
        for guid in &self.guids {
            if let Some(v) = guid.id.strip_prefix("imdb://") {
                d.external_ids.imdb = Some(v.to_string());
            } else if let Some(v) = guid.id.strip_prefix("tmdb://") {
                d.external_ids.tmdb = Some(v.to_string());
            } else if let Some(v) = guid.id.strip_prefix("tvdb://") {
                d.external_ids.tvdb = Some(v.to_string());
            } else if let Some(v) = guid.id.strip_prefix("mbid://") {
                d.external_ids.musicbrainz = Some(v.to_string());
            }
        }
        d
    }

    pub fn to_movie(&self, host: &str) -> Movie {
        Movie {
            details: self.details(host),
            cast: self
                .roles
                .iter()
                .map(|r| Person {
                    name: r.tag.clone(),
                    role: Some("Actor".to_string()),
                    character: r.role.clone(),
                })
                .collect(),
            crew: self
                .directors
                .iter()
                .map(|r| Person {
                    name: r.tag.clone(),
                    role: Some("Director".to_string()),
                    character: None,
                })
                .collect(),
            trailer_url: None,
        }
    }

    pub fn to_series(&self, host: &str) -> Series {
        Series {
            details: self.details(host),
            season_count: self.child_count.unwrap_or(0),
            episode_count: self.leaf_count.unwrap_or(0),
            status: None,
            network: self.studio.clone(),
            cast: Vec::new(),
            creators: Vec::new(),
        }
    }

    pub fn to_season(&self, host: &str) -> Season {
        Season {
            details: self.details(host),
            series_id: self.parent_rating_key.clone().unwrap_or_default(),
            number: self.index.unwrap_or(0),
            episode_count: self.leaf_count.unwrap_or(0),
        }
    }

    pub fn to_episode(&self, host: &str) -> Episode {
        Episode {
            details: self.details(host),
            series_id: self.grandparent_rating_key.clone().unwrap_or_default(),
            series_title: self.grandparent_title.clone(),
            season_number: self.parent_index.unwrap_or(0),
            episode_number: self.index.unwrap_or(0),
        }
    }

    pub fn to_track(&self, host: &str) -> Track {
        Track {
            details: self.details(host),
            album_id: self.parent_rating_key.clone(),
            album_name: self.parent_title.clone(),
            artist_id: self.grandparent_rating_key.clone(),
            artist_name: self.grandparent_title.clone(),
            number: self.index,
            disc_number: self.parent_index,
        }
    }

    pub fn to_album(&self, host: &str) -> Album {
        Album {
            details: self.details(host),
            artist_id: self.parent_rating_key.clone(),
            artist_name: self.parent_title.clone(),
            track_count: self.leaf_count.unwrap_or(0),
        }
    }

    pub fn to_artist(&self, host: &str) -> Artist {
        Artist {
            details: self.details(host),
            album_count: self.child_count.unwrap_or(0),
        }
    }

    fn media_type(&self) -> Option<MediaType> {
        match self.item_type.as_str() {
            "movie" => Some(MediaType::Movie),
            "show" => Some(MediaType::Series),
            "episode" => Some(MediaType::Episode),
            "track" => Some(MediaType::Track),
            "album" => Some(MediaType::Album),
            _ => None,
        }
    }
}

pub struct PlexClient {
    client_id: i64,
    capabilities: Capabilities,
    host: String,
    token: String,
    machine_id: OnceCell<String>,
    client: Client,
}

impl PlexClient {
    pub fn new(config: &ClientConfig, client: Client) -> ProviderResult<Self> {
        let token = config
            .settings
            .token
            .clone()
            .ok_or_else(|| ProviderError::InvalidConfig("missing plex token".to_string()))?;
        Ok(Self {
            client_id: config.id,
            capabilities: config.capabilities(),
            host: config.settings.base_url.trim_end_matches('/').to_string(),
            token,
            machine_id: OnceCell::new(),
            client,
        })
    }

    fn headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(X_PLEX_TOKEN, HeaderValue::from_str(&self.token)?);
        Ok(headers)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> ProviderResult<MediaContainer> {
        let url = format!("{}{}", self.host, path);
        debug!(client = self.client_id, url = %url, "GET");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(query)
            .send()
            .await?;
        let env: Envelope = json_response(resp).await?;
        Ok(env.container)
    }

    async fn send(&self, method: reqwest::Method, path: &str, query: &[(&str, String)]) -> ProviderResult<reqwest::Response> {
        let url = format!("{}{}", self.host, path);
        debug!(client = self.client_id, url = %url, method = %method, "request");
        let resp = self
            .client
            .request(method, &url)
            .headers(self.headers()?)
            .query(query)
            .send()
            .await?;
        check_response(resp)
    }

    async fn machine_id(&self) -> ProviderResult<&str> {
        let id = self
            .machine_id
            .get_or_try_init(|| async {
                self.get("/identity", &[])
                    .await?
                    .machine_identifier
                    .ok_or_else(|| ProviderError::Parse("missing machineIdentifier".to_string()))
            })
            .await?;
        Ok(id.as_str())
    }

    async fn item_uri(&self, item_id: &str) -> ProviderResult<String> {
        let machine_id = self.machine_id().await?;
        Ok(format!(
            "server://{}/com.plexapp.plugins.library/library/metadata/{}",
            machine_id, item_id
        ))
    }

    async fn sections(&self, section_type: &str) -> ProviderResult<Vec<Directory>> {
        let container = self.get("/library/sections", &[]).await?;
        Ok(container
            .directories
            .into_iter()
            .filter(|d| d.section_type == section_type)
            .collect())
    }

    /// Tag id of `name` in one section, from the section's `actor` or
    /// `director` listing.
    async fn tag_id(&self, section: &str, kind: &str, name: &str) -> ProviderResult<Option<String>> {
        let container = self.get(&format!("/library/sections/{}/{}", section, kind), &[]).await?;
        Ok(container
            .directories
            .into_iter()
            .find(|d| d.title.eq_ignore_ascii_case(name))
            .map(|d| d.key))
    }

    /// Lists items of `item_type` across every section of `section_type`.
    /// Title, year, actor and director filters run on the server; genre,
    /// studio and rating run here, so the page size is only sent when none
    /// of those are set.
    async fn library_items(&self, section_type: &str, item_type: i32, options: &QueryOptions) -> ProviderResult<Vec<Metadata>> {
        if options.actor.is_some() && !matches!(item_type, TYPE_MOVIE | TYPE_SHOW) {
            return Err(ProviderError::unsupported("actor filter"));
        }
        if options.creator.is_some() && item_type != TYPE_MOVIE {
            return Err(ProviderError::unsupported("creator filter"));
        }

        let mut q = vec![("type", item_type.to_string())];
        if let Some(ref title) = options.query {
            q.push(("title", title.clone()));
        }
        if let Some(year) = options.year {
            q.push(("year", year.to_string()));
        }
        if options.favorites {
            q.push(("userRating>>", "0".to_string()));
        }
        let sort = if options.recently_added {
            Some(SortField::AddedAt)
        } else {
            options.sort
        };
        let dir = match options.sort_order.unwrap_or_default() {
            SortOrder::Asc => "",
            SortOrder::Desc => ":desc",
        };
        let sort_key = match sort {
            Some(SortField::AddedAt) => "addedAt",
            Some(SortField::Rating) => "audienceRating",
            Some(SortField::Popularity) => "viewCount",
            Some(SortField::ReleaseYear) => "year",
            Some(SortField::Title) | None => "titleSort",
        };
        q.push(("sort", format!("{}{}", sort_key, dir)));
        let filtered_here = options.genre.is_some()
            || options.studio.is_some()
            || options.min_rating.is_some()
            || options.max_rating.is_some();
        if let (Some(limit), false) = (options.provider_limit(), filtered_here) {
            q.push(("X-Plex-Container-Start", "0".to_string()));
            q.push(("X-Plex-Container-Size", limit.to_string()));
        }

        let mut out = Vec::new();
        'sections: for section in self.sections(section_type).await? {
            let mut sq = q.clone();
            for (name, kind) in [(&options.actor, "actor"), (&options.creator, "director")] {
                if let Some(name) = name {
                    match self.tag_id(&section.key, kind, name).await? {
                        Some(id) => sq.push((kind, id)),
                        None => continue 'sections,
                    }
                }
            }
            let container = self
                .get(&format!("/library/sections/{}/all", section.key), &sq)
                .await?;
            out.extend(container.metadata);
        }
        if filtered_here {
            let host = self.host.clone();
            let filter = QueryOptions {
                genre: options.genre.clone(),
                studio: options.studio.clone(),
                min_rating: options.min_rating,
                max_rating: options.max_rating,
                ..Default::default()
            };
            out.retain(|m| filter.matches(&m.details(&host)));
        }
        Ok(out)
    }

    async fn metadata(&self, id: &str) -> ProviderResult<Metadata> {
        self.get(&format!("/library/metadata/{}", id), &[])
            .await?
            .metadata
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("plex item {}", id)))
    }

    async fn children(&self, path: &str) -> ProviderResult<Vec<Metadata>> {
        Ok(self.get(path, &[]).await?.metadata)
    }

    fn wrap<T: MediaData>(&self, m: &Metadata, data: T) -> MediaItem<T> {
        MediaItem::from_client(self.client_id, ClientType::Plex, m.rating_key.clone(), data)
    }

    fn wrap_list<T: ListPayload>(&self, m: &Metadata, entries: &[Metadata]) -> MediaItem<T> {
        let list = ListData::from_item_ids(entries.iter().map(|e| e.rating_key.clone()));
        self.wrap(m, T::new_list(m.details(&self.host), list))
    }

    fn playlist_entry(entries: &[Metadata], item_id: &str) -> ProviderResult<i64> {
        entries
            .iter()
            .find(|e| e.rating_key == item_id)
            .and_then(|e| e.playlist_item_id)
            .ok_or_else(|| ProviderError::NotFound(format!("playlist entry for {}", item_id)))
    }
}

#[async_trait]
impl Provider for PlexClient {
    fn client_id(&self) -> i64 {
        self.client_id
    }

    fn client_type(&self) -> ClientType {
        ClientType::Plex
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        self.machine_id().await?;
        Ok(())
    }

    async fn get_movies(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Movie>>> {
        let items = self.library_items("movie", TYPE_MOVIE, options).await?;
        Ok(items.iter().map(|m| self.wrap(m, m.to_movie(&self.host))).collect())
    }

    async fn get_movie(&self, id: &str) -> ProviderResult<MediaItem<Movie>> {
        let m = self.metadata(id).await?;
        Ok(self.wrap(&m, m.to_movie(&self.host)))
    }

    async fn get_series_list(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Series>>> {
        let items = self.library_items("show", TYPE_SHOW, options).await?;
        Ok(items.iter().map(|m| self.wrap(m, m.to_series(&self.host))).collect())
    }

    async fn get_series(&self, id: &str) -> ProviderResult<MediaItem<Series>> {
        let m = self.metadata(id).await?;
        Ok(self.wrap(&m, m.to_series(&self.host)))
    }

    async fn get_seasons(&self, series_id: &str) -> ProviderResult<Vec<MediaItem<Season>>> {
        let seasons = self
            .children(&format!("/library/metadata/{}/children", series_id))
            .await?;
        Ok(seasons.iter().map(|m| self.wrap(m, m.to_season(&self.host))).collect())
    }

    async fn get_episodes(&self, series_id: &str, season: i32) -> ProviderResult<Vec<MediaItem<Episode>>> {
        let seasons = self
            .children(&format!("/library/metadata/{}/children", series_id))
            .await?;
        let season_key = seasons
            .iter()
            .find(|s| s.index == Some(season))
            .map(|s| s.rating_key.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("season {} of {}", season, series_id)))?;
        let episodes = self
            .children(&format!("/library/metadata/{}/children", season_key))
            .await?;
        Ok(episodes.iter().map(|m| self.wrap(m, m.to_episode(&self.host))).collect())
    }

    async fn get_tracks(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Track>>> {
        let items = self.library_items("artist", TYPE_TRACK, options).await?;
        Ok(items.iter().map(|m| self.wrap(m, m.to_track(&self.host))).collect())
    }

    async fn get_track(&self, id: &str) -> ProviderResult<MediaItem<Track>> {
        let m = self.metadata(id).await?;
        Ok(self.wrap(&m, m.to_track(&self.host)))
    }

    async fn get_albums(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Album>>> {
        let items = self.library_items("artist", TYPE_ALBUM, options).await?;
        Ok(items.iter().map(|m| self.wrap(m, m.to_album(&self.host))).collect())
    }

    async fn get_album(&self, id: &str) -> ProviderResult<MediaItem<Album>> {
        let m = self.metadata(id).await?;
        Ok(self.wrap(&m, m.to_album(&self.host)))
    }

    async fn get_artists(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Artist>>> {
        let items = self.library_items("artist", TYPE_ARTIST, options).await?;
        Ok(items.iter().map(|m| self.wrap(m, m.to_artist(&self.host))).collect())
    }

    async fn get_artist(&self, id: &str) -> ProviderResult<MediaItem<Artist>> {
        let m = self.metadata(id).await?;
        Ok(self.wrap(&m, m.to_artist(&self.host)))
    }

    async fn get_playlists(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Playlist>>> {
        let container = self.get("/playlists", &[]).await?;
        Ok(container
            .metadata
            .iter()
            .filter(|m| options.matches(&m.details(&self.host)))
            .map(|m| self.wrap_list(m, &[]))
            .collect())
    }

    async fn get_playlist(&self, id: &str) -> ProviderResult<MediaItem<Playlist>> {
        let container = self.get(&format!("/playlists/{}", id), &[]).await?;
        let m = container
            .metadata
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("plex playlist {}", id)))?;
        let entries = self.children(&format!("/playlists/{}/items", id)).await?;
        Ok(self.wrap_list(&m, &entries))
    }

    async fn create_playlist(&self, name: &str, description: &str) -> ProviderResult<MediaItem<Playlist>> {
        let machine_id = self.machine_id().await?.to_string();
        let resp = self
            .send(
                reqwest::Method::POST,
                "/playlists",
                &[
                    ("type", "video".to_string()),
                    ("title", name.to_string()),
                    ("smart", "0".to_string()),
                    ("uri", format!("server://{}/com.plexapp.plugins.library", machine_id)),
                ],
            )
            .await?;
        let env: Envelope = serde_json::from_slice(&resp.bytes().await?)?;
        let created = env
            .container
            .metadata
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("plex returned no playlist".to_string()))?;
        if !description.is_empty() {
            self.update_playlist(&created.rating_key, name, description).await?;
        }
        self.get_playlist(&created.rating_key).await
    }

    async fn update_playlist(&self, id: &str, name: &str, description: &str) -> ProviderResult<()> {
        self.send(
            reqwest::Method::PUT,
            &format!("/playlists/{}", id),
            &[("title", name.to_string()), ("summary", description.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn delete_playlist(&self, id: &str) -> ProviderResult<()> {
        self.send(reqwest::Method::DELETE, &format!("/playlists/{}", id), &[])
            .await?;
        Ok(())
    }

    async fn add_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        let uri = self.item_uri(item_id).await?;
        self.send(
            reqwest::Method::PUT,
            &format!("/playlists/{}/items", id),
            &[("uri", uri)],
        )
        .await?;
        Ok(())
    }

    async fn remove_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        let entries = self.children(&format!("/playlists/{}/items", id)).await?;
        let entry = Self::playlist_entry(&entries, item_id)?;
        self.send(
            reqwest::Method::DELETE,
            &format!("/playlists/{}/items/{}", id, entry),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn reorder_playlist_items(&self, id: &str, item_ids: &[String]) -> ProviderResult<()> {
        let entries = self.children(&format!("/playlists/{}/items", id)).await?;
        let mut previous: Option<i64> = None;
        for item_id in item_ids {
            let entry = Self::playlist_entry(&entries, item_id)?;
            let query: Vec<(&str, String)> = previous
                .map(|p| vec![("after", p.to_string())])
                .unwrap_or_default();
            self.send(
                reqwest::Method::PUT,
                &format!("/playlists/{}/items/{}/move", id, entry),
                &query,
            )
            .await?;
            previous = Some(entry);
        }
        Ok(())
    }

    async fn get_collections(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Collection>>> {
        let mut out = Vec::new();
        let container = self.get("/library/sections", &[]).await?;
        for section in container.directories {
            let collections = self
                .children(&format!("/library/sections/{}/collections", section.key))
                .await?;
            out.extend(
                collections
                    .iter()
                    .filter(|m| options.matches(&m.details(&self.host)))
                    .map(|m| self.wrap_list(m, &[])),
            );
        }
        Ok(out)
    }

    async fn get_collection(&self, id: &str) -> ProviderResult<MediaItem<Collection>> {
        let m = self.metadata(id).await?;
        let children = self
            .children(&format!("/library/collections/{}/children", id))
            .await?;
        Ok(self.wrap_list(&m, &children))
    }

    async fn delete_collection(&self, id: &str) -> ProviderResult<()> {
        self.send(reqwest::Method::DELETE, &format!("/library/collections/{}", id), &[])
            .await?;
        Ok(())
    }

    async fn add_collection_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        let uri = self.item_uri(item_id).await?;
        self.send(
            reqwest::Method::PUT,
            &format!("/library/collections/{}/items", id),
            &[("uri", uri)],
        )
        .await?;
        Ok(())
    }

    async fn remove_collection_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        self.send(
            reqwest::Method::DELETE,
            &format!("/library/collections/{}/items/{}", id, item_id),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn get_play_history(&self, options: &QueryOptions) -> ProviderResult<Vec<WatchHistoryEntry>> {
        let mut q = vec![("sort", "viewedAt:desc".to_string())];
        if let Some(limit) = options.provider_limit() {
            q.push(("X-Plex-Container-Size", limit.to_string()));
        }
        let container = self.get("/status/sessions/history/all", &q).await?;
        Ok(container
            .metadata
            .iter()
            .filter_map(|m| {
                Some(WatchHistoryEntry {
                    client_id: self.client_id,
                    media_type: m.media_type()?,
                    item_id: m.rating_key.clone(),
                    title: m.title.clone(),
                    played_at: from_unix(m.viewed_at),
                    play_count: m.view_count.unwrap_or(1),
                })
            })
            .collect())
    }
}
