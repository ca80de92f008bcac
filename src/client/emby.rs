//! Jellyfin and Emby adapter. Both servers speak the same REST dialect; Emby
//! mounts it under `/emby`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::media::*;

use super::config::{Capabilities, ClientConfig, ClientType};
use super::error::{check_response, json_response, ProviderError, ProviderResult};
use super::provider::{Provider, WatchHistoryEntry};

const X_EMBY_TOKEN: &str = "X-Emby-Token";
const CREATOR_TYPES: &str = "Director,Writer,Creator";
const ITEM_FIELDS: &str =
    "Genres,Overview,Studios,People,ProviderIds,DateCreated,CommunityRating,OfficialRating,PremiereDate,ChildCount,RecursiveItemCount";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NameId {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PersonInfo {
    pub name: String,
    pub role: Option<String>,
    #[serde(rename = "Type")]
    pub person_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ItemUserData {
    pub is_favorite: bool,
    pub played: bool,
    pub play_count: i32,
    pub last_played_date: Option<DateTime<Utc>>,
    pub rating: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BaseItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub item_type: String,
    pub overview: Option<String>,
    pub production_year: Option<i32>,
    pub premiere_date: Option<String>,
    pub date_created: Option<DateTime<Utc>>,
    pub genres: Vec<String>,
    pub studios: Vec<NameId>,
    pub official_rating: Option<String>,
    pub community_rating: Option<f32>,
    pub run_time_ticks: Option<i64>,
    pub provider_ids: HashMap<String, String>,
    pub user_data: Option<ItemUserData>,
    pub people: Vec<PersonInfo>,
    pub series_id: Option<String>,
    pub series_name: Option<String>,
    pub parent_index_number: Option<i32>,
    pub index_number: Option<i32>,
    pub album_id: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub artist_items: Vec<NameId>,
    pub child_count: Option<i32>,
    pub recursive_item_count: Option<i32>,
    pub status: Option<String>,
    pub playlist_item_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ItemsResponse {
    pub items: Vec<BaseItem>,
    pub total_record_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedResponse {
    id: String,
}

impl BaseItem {
    fn details(&self) -> Details {
        let mut d = Details::titled(self.name.clone());
        d.description = self.overview.clone().unwrap_or_default();
        d.set_release_date(self.premiere_date.as_deref().and_then(Details::parse_date));
        if d.release_year.is_none() {
            d.release_year = self.production_year;
        }
        d.genres = self.genres.clone();
        d.studios = self.studios.iter().map(|s| s.name.clone()).collect();
        d.content_rating = self.official_rating.clone();
        d.community_rating = self.community_rating;
        // 10,000,000 ticks per second
        d.duration = self.run_time_ticks.map(|t| t / 10_000_000);
        d.added_at = self.date_created;
        for (key, value) in &self.provider_ids {
            match key.to_lowercase().as_str() {
                "tmdb" => d.external_ids.tmdb = Some(value.clone()),
                "imdb" => d.external_ids.imdb = Some(value.clone()),
                "tvdb" => d.external_ids.tvdb = Some(value.clone()),
                "musicbrainzalbum" | "musicbrainzartist" | "musicbrainztrack" => {
                    d.external_ids.musicbrainz = Some(value.clone())
                }
                _ => {}
            }
        }
        if let Some(ref ud) = self.user_data {
            d.is_favorite = ud.is_favorite;
            d.user_rating = ud.rating;
        }
        d
    }

    fn people(&self, kind: &str) -> Vec<Person> {
        self.people
            .iter()
            .filter(|p| p.person_type.as_deref() == Some(kind))
            .map(|p| Person {
                name: p.name.clone(),
                role: p.person_type.clone(),
                character: p.role.clone(),
            })
            .collect()
    }

    pub fn to_movie(&self) -> Movie {
        Movie {
            details: self.details(),
            cast: self.people("Actor"),
            crew: self.people("Director"),
            trailer_url: None,
        }
    }

    pub fn to_series(&self) -> Series {
        Series {
            details: self.details(),
            season_count: self.child_count.unwrap_or(0),
            episode_count: self.recursive_item_count.unwrap_or(0),
            status: self.status.clone(),
            network: self.studios.first().map(|s| s.name.clone()),
            cast: self.people("Actor"),
            creators: self.people("Writer"),
        }
    }

    pub fn to_season(&self) -> Season {
        Season {
            details: self.details(),
            series_id: self.series_id.clone().unwrap_or_default(),
            number: self.index_number.unwrap_or(0),
            episode_count: self.child_count.unwrap_or(0),
        }
    }

    pub fn to_episode(&self) -> Episode {
        Episode {
            details: self.details(),
            series_id: self.series_id.clone().unwrap_or_default(),
            series_title: self.series_name.clone(),
            season_number: self.parent_index_number.unwrap_or(0),
            episode_number: self.index_number.unwrap_or(0),
        }
    }

    pub fn to_track(&self) -> Track {
        let artist = self.artist_items.first();
        Track {
            details: self.details(),
            album_id: self.album_id.clone(),
            album_name: self.album.clone(),
            artist_id: artist.and_then(|a| a.id.clone()),
            artist_name: artist.map(|a| a.name.clone()).or_else(|| self.album_artist.clone()),
            number: self.index_number,
            disc_number: self.parent_index_number,
        }
    }

    pub fn to_album(&self) -> Album {
        let artist = self.artist_items.first();
        Album {
            details: self.details(),
            artist_id: artist.and_then(|a| a.id.clone()),
            artist_name: self.album_artist.clone().or_else(|| artist.map(|a| a.name.clone())),
            track_count: self.child_count.unwrap_or(0),
        }
    }

    pub fn to_artist(&self) -> Artist {
        Artist {
            details: self.details(),
            album_count: self.child_count.unwrap_or(0),
        }
    }

    fn media_type(&self) -> Option<MediaType> {
        match self.item_type.as_str() {
            "Movie" => Some(MediaType::Movie),
            "Series" => Some(MediaType::Series),
            "Episode" => Some(MediaType::Episode),
            "Audio" => Some(MediaType::Track),
            "MusicAlbum" => Some(MediaType::Album),
            _ => None,
        }
    }
}

/// Jellyfin / Emby HTTP client.
pub struct EmbyClient {
    client_id: i64,
    client_type: ClientType,
    capabilities: Capabilities,
    host: String,
    api_prefix: &'static str,
    api_key: String,
    username: Option<String>,
    user_id: OnceCell<String>,
    client: Client,
}

impl EmbyClient {
    pub fn new(config: &ClientConfig, client: Client) -> ProviderResult<Self> {
        let api_key = config
            .settings
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::InvalidConfig("missing api key".to_string()))?;
        let api_prefix = match config.client_type {
            ClientType::Emby => "/emby",
            _ => "",
        };
        let user_id = OnceCell::new();
        if let Some(ref id) = config.settings.user_id {
            let _ = user_id.set(id.clone());
        }
        Ok(Self {
            client_id: config.id,
            client_type: config.client_type,
            capabilities: config.capabilities(),
            host: config.settings.base_url.trim_end_matches('/').to_string(),
            api_prefix,
            api_key,
            username: config.settings.username.clone(),
            user_id,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.host, self.api_prefix, path)
    }

    fn headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(X_EMBY_TOKEN, HeaderValue::from_str(&self.api_key)?);
        Ok(headers)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ProviderResult<T> {
        let url = self.url(path);
        debug!(client = self.client_id, url = %url, "GET");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(query)
            .send()
            .await?;
        json_response(resp).await
    }

    async fn send(&self, method: reqwest::Method, path: &str, query: &[(&str, String)]) -> ProviderResult<reqwest::Response> {
        let url = self.url(path);
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

    /// The vendor user id, resolved by name on first use.
    async fn user_id(&self) -> ProviderResult<&str> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let username = self
                    .username
                    .as_deref()
                    .ok_or_else(|| ProviderError::InvalidConfig("missing user id".to_string()))?;
                let users: Vec<NameId> = self.get("/Users", &[]).await?;
                users
                    .into_iter()
                    .find(|u| u.name.eq_ignore_ascii_case(username))
                    .and_then(|u| u.id)
                    .ok_or_else(|| ProviderError::Auth(format!("user {} not found", username)))
            })
            .await?;
        Ok(id.as_str())
    }

    fn query_params(item_types: &str, options: &QueryOptions) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("IncludeItemTypes", item_types.to_string()),
            ("Recursive", "true".to_string()),
            ("Fields", ITEM_FIELDS.to_string()),
        ];
        if let Some(ref term) = options.query {
            q.push(("SearchTerm", term.clone()));
        }
        if let Some(ref genre) = options.genre {
            q.push(("Genres", genre.clone()));
        }
        if let Some(year) = options.year {
            q.push(("Years", year.to_string()));
        }
        // `Person` takes one name; a creator next to an actor is checked in `items`
        match (&options.actor, &options.creator) {
            (Some(actor), _) => {
                q.push(("Person", actor.clone()));
                q.push(("PersonTypes", "Actor".to_string()));
            }
            (None, Some(creator)) => {
                q.push(("Person", creator.clone()));
                q.push(("PersonTypes", CREATOR_TYPES.to_string()));
            }
            (None, None) => {}
        }
        if let Some(ref studio) = options.studio {
            q.push(("Studios", studio.clone()));
        }
        if let Some(min) = options.min_rating {
            q.push(("MinCommunityRating", min.to_string()));
        }
        if options.favorites {
            q.push(("IsFavorite", "true".to_string()));
        }
        if let Some(ref parent) = options.external_source_id {
            q.push(("ParentId", parent.clone()));
        }
        let sort = if options.recently_added {
            Some(SortField::AddedAt)
        } else {
            options.sort
        };
        let sort_by = match sort {
            Some(SortField::AddedAt) => "DateCreated",
            Some(SortField::Rating) => "CommunityRating",
            Some(SortField::Popularity) => "PlayCount",
            Some(SortField::ReleaseYear) => "ProductionYear",
            Some(SortField::Title) | None => "SortName",
        };
        q.push(("SortBy", sort_by.to_string()));
        let order = match options.sort_order.unwrap_or_default() {
            SortOrder::Asc => "Ascending",
            SortOrder::Desc => "Descending",
        };
        q.push(("SortOrder", order.to_string()));
        if let (Some(limit), false) = (options.provider_limit(), Self::filters_locally(options)) {
            q.push(("Limit", limit.to_string()));
        }
        q
    }

    fn filters_locally(options: &QueryOptions) -> bool {
        options.max_rating.is_some() || (options.actor.is_some() && options.creator.is_some())
    }

    async fn items(&self, item_types: &str, options: &QueryOptions) -> ProviderResult<Vec<BaseItem>> {
        let user_id = self.user_id().await?.to_string();
        let q = Self::query_params(item_types, options);
        let resp: ItemsResponse = self.get(&format!("/Users/{}/Items", user_id), &q).await?;
        let mut items = resp.items;
        if let Some(max) = options.max_rating {
            items.retain(|i| i.community_rating.map(|r| r <= max).unwrap_or(false));
        }
        if let (Some(_), Some(creator)) = (&options.actor, &options.creator) {
            items.retain(|i| {
                i.people.iter().any(|p| {
                    p.name.eq_ignore_ascii_case(creator)
                        && p.person_type.as_deref().map(|t| CREATOR_TYPES.split(',').any(|c| c == t)).unwrap_or(false)
                })
            });
        }
        Ok(items)
    }

    async fn item(&self, id: &str) -> ProviderResult<BaseItem> {
        let user_id = self.user_id().await?.to_string();
        self.get(&format!("/Users/{}/Items/{}", user_id, id), &[]).await
    }

    async fn children(&self, parent_id: &str) -> ProviderResult<Vec<BaseItem>> {
        let user_id = self.user_id().await?.to_string();
        let resp: ItemsResponse = self
            .get(
                &format!("/Users/{}/Items", user_id),
                &[("ParentId", parent_id.to_string()), ("Fields", ITEM_FIELDS.to_string())],
            )
            .await?;
        Ok(resp.items)
    }

    async fn playlist_entries(&self, playlist_id: &str) -> ProviderResult<Vec<BaseItem>> {
        let user_id = self.user_id().await?.to_string();
        let resp: ItemsResponse = self
            .get(
                &format!("/Playlists/{}/Items", playlist_id),
                &[("UserId", user_id)],
            )
            .await?;
        Ok(resp.items)
    }

    fn wrap<T: MediaData>(&self, item: &BaseItem, data: T) -> MediaItem<T> {
        MediaItem::from_client(self.client_id, self.client_type, item.id.clone(), data)
    }

    fn wrap_list<T: ListPayload>(&self, item: &BaseItem, entries: &[BaseItem]) -> MediaItem<T> {
        let list = ListData::from_item_ids(entries.iter().map(|e| e.id.clone()));
        self.wrap(item, T::new_list(item.details(), list))
    }

    /// Renames an item by posting its full record back.
    async fn update_item(&self, id: &str, name: &str, description: &str) -> ProviderResult<()> {
        let user_id = self.user_id().await?.to_string();
        let mut raw: Value = self.get(&format!("/Users/{}/Items/{}", user_id, id), &[]).await?;
        if let Some(obj) = raw.as_object_mut() {
            obj.insert("Name".to_string(), Value::String(name.to_string()));
            obj.insert("Overview".to_string(), Value::String(description.to_string()));
        }
        let resp = self
            .client
            .post(self.url(&format!("/Items/{}", id)))
            .headers(self.headers()?)
            .json(&raw)
            .send()
            .await?;
        check_response(resp)?;
        Ok(())
    }
}

#[async_trait]
impl Provider for EmbyClient {
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
        let _: Value = self.get("/System/Info", &[]).await?;
        self.user_id().await?;
        Ok(())
    }

    async fn get_movies(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Movie>>> {
        let items = self.items("Movie", options).await?;
        Ok(items.iter().map(|i| self.wrap(i, i.to_movie())).collect())
    }

    async fn get_movie(&self, id: &str) -> ProviderResult<MediaItem<Movie>> {
        let item = self.item(id).await?;
        Ok(self.wrap(&item, item.to_movie()))
    }

    async fn get_series_list(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Series>>> {
        let items = self.items("Series", options).await?;
        Ok(items.iter().map(|i| self.wrap(i, i.to_series())).collect())
    }

    async fn get_series(&self, id: &str) -> ProviderResult<MediaItem<Series>> {
        let item = self.item(id).await?;
        Ok(self.wrap(&item, item.to_series()))
    }

    async fn get_seasons(&self, series_id: &str) -> ProviderResult<Vec<MediaItem<Season>>> {
        let user_id = self.user_id().await?.to_string();
        let resp: ItemsResponse = self
            .get(&format!("/Shows/{}/Seasons", series_id), &[("UserId", user_id)])
            .await?;
        Ok(resp.items.iter().map(|i| self.wrap(i, i.to_season())).collect())
    }

    async fn get_episodes(&self, series_id: &str, season: i32) -> ProviderResult<Vec<MediaItem<Episode>>> {
        let user_id = self.user_id().await?.to_string();
        let resp: ItemsResponse = self
            .get(
                &format!("/Shows/{}/Episodes", series_id),
                &[
                    ("UserId", user_id),
                    ("Season", season.to_string()),
                    ("Fields", ITEM_FIELDS.to_string()),
                ],
            )
            .await?;
        Ok(resp.items.iter().map(|i| self.wrap(i, i.to_episode())).collect())
    }

    async fn get_tracks(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Track>>> {
        let items = self.items("Audio", options).await?;
        Ok(items.iter().map(|i| self.wrap(i, i.to_track())).collect())
    }

    async fn get_track(&self, id: &str) -> ProviderResult<MediaItem<Track>> {
        let item = self.item(id).await?;
        Ok(self.wrap(&item, item.to_track()))
    }

    async fn get_albums(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Album>>> {
        let items = self.items("MusicAlbum", options).await?;
        Ok(items.iter().map(|i| self.wrap(i, i.to_album())).collect())
    }

    async fn get_album(&self, id: &str) -> ProviderResult<MediaItem<Album>> {
        let item = self.item(id).await?;
        Ok(self.wrap(&item, item.to_album()))
    }

    async fn get_artists(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Artist>>> {
        let items = self.items("MusicArtist", options).await?;
        Ok(items.iter().map(|i| self.wrap(i, i.to_artist())).collect())
    }

    async fn get_artist(&self, id: &str) -> ProviderResult<MediaItem<Artist>> {
        let item = self.item(id).await?;
        Ok(self.wrap(&item, item.to_artist()))
    }

    async fn get_playlists(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Playlist>>> {
        let items = self.items("Playlist", options).await?;
        Ok(items.iter().map(|i| self.wrap_list(i, &[])).collect())
    }

    async fn get_playlist(&self, id: &str) -> ProviderResult<MediaItem<Playlist>> {
        let item = self.item(id).await?;
        let entries = self.playlist_entries(id).await?;
        Ok(self.wrap_list(&item, &entries))
    }

    async fn create_playlist(&self, name: &str, description: &str) -> ProviderResult<MediaItem<Playlist>> {
        let user_id = self.user_id().await?.to_string();
        let resp = self
            .send(
                reqwest::Method::POST,
                "/Playlists",
                &[("Name", name.to_string()), ("UserId", user_id)],
            )
            .await?;
        let created: CreatedResponse = serde_json::from_slice(&resp.bytes().await?)?;
        if !description.is_empty() {
            self.update_item(&created.id, name, description).await?;
        }
        self.get_playlist(&created.id).await
    }

    async fn update_playlist(&self, id: &str, name: &str, description: &str) -> ProviderResult<()> {
        self.update_item(id, name, description).await
    }

    async fn delete_playlist(&self, id: &str) -> ProviderResult<()> {
        self.send(reqwest::Method::DELETE, &format!("/Items/{}", id), &[]).await?;
        Ok(())
    }

    async fn add_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        let user_id = self.user_id().await?.to_string();
        self.send(
            reqwest::Method::POST,
            &format!("/Playlists/{}/Items", id),
            &[("Ids", item_id.to_string()), ("UserId", user_id)],
        )
        .await?;
        Ok(())
    }

    async fn remove_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        let entries = self.playlist_entries(id).await?;
        let entry_id = entries
            .iter()
            .find(|e| e.id == item_id)
            .and_then(|e| e.playlist_item_id.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("item {} in playlist {}", item_id, id)))?;
        self.send(
            reqwest::Method::DELETE,
            &format!("/Playlists/{}/Items", id),
            &[("EntryIds", entry_id)],
        )
        .await?;
        Ok(())
    }

    async fn reorder_playlist_items(&self, id: &str, item_ids: &[String]) -> ProviderResult<()> {
        let entries = self.playlist_entries(id).await?;
        for (index, item_id) in item_ids.iter().enumerate() {
            let entry_id = entries
                .iter()
                .find(|e| &e.id == item_id)
                .and_then(|e| e.playlist_item_id.clone())
                .ok_or_else(|| ProviderError::NotFound(format!("item {} in playlist {}", item_id, id)))?;
            self.send(
                reqwest::Method::POST,
                &format!("/Playlists/{}/Items/{}/Move/{}", id, entry_id, index),
                &[],
            )
            .await?;
        }
        Ok(())
    }

    async fn get_collections(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Collection>>> {
        let items = self.items("BoxSet", options).await?;
        Ok(items.iter().map(|i| self.wrap_list(i, &[])).collect())
    }

    async fn get_collection(&self, id: &str) -> ProviderResult<MediaItem<Collection>> {
        let item = self.item(id).await?;
        let children = self.children(id).await?;
        Ok(self.wrap_list(&item, &children))
    }

    async fn create_collection(&self, name: &str, description: &str) -> ProviderResult<MediaItem<Collection>> {
        let resp = self
            .send(reqwest::Method::POST, "/Collections", &[("Name", name.to_string())])
            .await?;
        let created: CreatedResponse = serde_json::from_slice(&resp.bytes().await?)?;
        if !description.is_empty() {
            self.update_item(&created.id, name, description).await?;
        }
        self.get_collection(&created.id).await
    }

    async fn update_collection(&self, id: &str, name: &str, description: &str) -> ProviderResult<()> {
        self.update_item(id, name, description).await
    }

    async fn delete_collection(&self, id: &str) -> ProviderResult<()> {
        self.send(reqwest::Method::DELETE, &format!("/Items/{}", id), &[]).await?;
        Ok(())
    }

    async fn add_collection_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        self.send(
            reqwest::Method::POST,
            &format!("/Collections/{}/Items", id),
            &[("Ids", item_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn remove_collection_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        self.send(
            reqwest::Method::DELETE,
            &format!("/Collections/{}/Items", id),
            &[("Ids", item_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn get_play_history(&self, options: &QueryOptions) -> ProviderResult<Vec<WatchHistoryEntry>> {
        let user_id = self.user_id().await?.to_string();
        let mut q = vec![
            ("IncludeItemTypes", "Movie,Episode,Audio".to_string()),
            ("Recursive", "true".to_string()),
            ("Filters", "IsPlayed".to_string()),
            ("SortBy", "DatePlayed".to_string()),
            ("SortOrder", "Descending".to_string()),
        ];
        if let Some(limit) = options.provider_limit() {
            q.push(("Limit", limit.to_string()));
        }
        let resp: ItemsResponse = self.get(&format!("/Users/{}/Items", user_id), &q).await?;
        Ok(resp
            .items
            .iter()
            .filter_map(|i| {
                let media_type = i.media_type()?;
                let ud = i.user_data.as_ref();
                Some(WatchHistoryEntry {
                    client_id: self.client_id,
                    media_type,
                    item_id: i.id.clone(),
                    title: i.name.clone(),
                    played_at: ud.and_then(|u| u.last_played_date),
                    play_count: ud.map(|u| u.play_count).unwrap_or(0),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOVIE_JSON: &str = r#"{
        "Id": "f27caa37e5142225cceded48f6553502",
        "Name": "The Matrix",
        "Type": "Movie",
        "Overview": "A hacker learns the truth.",
        "ProductionYear": 1999,
        "PremiereDate": "1999-03-30T00:00:00.0000000Z",
        "DateCreated": "2023-01-02T03:04:05.0000000Z",
        "Genres": ["Action", "Science Fiction"],
        "Studios": [{"Name": "Warner Bros.", "Id": "1"}],
        "OfficialRating": "R",
        "CommunityRating": 8.2,
        "RunTimeTicks": 81720000000,
        "ProviderIds": {"Tmdb": "603", "Imdb": "tt0133093"},
        "UserData": {"IsFavorite": true, "Played": false, "PlayCount": 2},
        "People": [
            {"Name": "Keanu Reeves", "Role": "Neo", "Type": "Actor"},
            {"Name": "Lana Wachowski", "Type": "Director"}
        ]
    }"#;

    #[test]
    fn test_movie_mapping() {
        let item: BaseItem = serde_json::from_str(MOVIE_JSON).unwrap();
        let movie = item.to_movie();
        assert_eq!(movie.details.title, "The Matrix");
        assert_eq!(movie.details.release_year, Some(1999));
        assert_eq!(movie.details.duration, Some(8172));
        assert_eq!(movie.details.external_ids.tmdb.as_deref(), Some("603"));
        assert_eq!(movie.details.external_ids.imdb.as_deref(), Some("tt0133093"));
        assert_eq!(movie.details.studios, vec!["Warner Bros.".to_string()]);
        assert!(movie.details.is_favorite);
        assert!(movie.details.added_at.is_some());
        assert_eq!(movie.cast.len(), 1);
        assert_eq!(movie.cast[0].character.as_deref(), Some("Neo"));
        assert_eq!(movie.crew[0].name, "Lana Wachowski");
    }

    #[test]
    fn test_track_mapping() {
        let json = r#"{
            "Id": "t1", "Name": "Song", "Type": "Audio",
            "AlbumId": "a1", "Album": "Record", "AlbumArtist": "Band",
            "ArtistItems": [{"Id": "ar1", "Name": "Band"}],
            "IndexNumber": 3, "ParentIndexNumber": 1, "RunTimeTicks": 1800000000
        }"#;
        let item: BaseItem = serde_json::from_str(json).unwrap();
        let track = item.to_track();
        assert_eq!(track.album_id.as_deref(), Some("a1"));
        assert_eq!(track.artist_id.as_deref(), Some("ar1"));
        assert_eq!(track.number, Some(3));
        assert_eq!(track.details.duration, Some(180));
    }

    #[test]
    fn test_query_params() {
        let opts = QueryOptions {
            query: Some("matrix".to_string()),
            year: Some(1999),
            favorites: true,
            limit: Some(10),
            offset: Some(5),
            sort: Some(SortField::Rating),
            ..Default::default()
        };
        let q = EmbyClient::query_params("Movie", &opts);
        let get = |k: &str| q.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("SearchTerm"), Some("matrix"));
        assert_eq!(get("Years"), Some("1999"));
        assert_eq!(get("IsFavorite"), Some("true"));
        assert_eq!(get("SortBy"), Some("CommunityRating"));
        assert_eq!(get("SortOrder"), Some("Descending"));
        assert_eq!(get("Limit"), Some("15"));
    }

    #[test]
    fn test_query_params_person_and_local_filters() {
        let opts = QueryOptions {
            actor: Some("Keanu Reeves".to_string()),
            creator: Some("Lana Wachowski".to_string()),
            limit: Some(10),
            ..Default::default()
        };
        let q = EmbyClient::query_params("Movie", &opts);
        let persons: Vec<&str> = q.iter().filter(|(k, _)| *k == "Person").map(|(_, v)| v.as_str()).collect();
        assert_eq!(persons, vec!["Keanu Reeves"]);
        assert!(q.iter().all(|(k, _)| *k != "Limit"));

        let opts = QueryOptions {
            creator: Some("Lana Wachowski".to_string()),
            limit: Some(10),
            ..Default::default()
        };
        let q = EmbyClient::query_params("Movie", &opts);
        let get = |k: &str| q.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("Person"), Some("Lana Wachowski"));
        assert_eq!(get("PersonTypes"), Some(CREATOR_TYPES));
        assert_eq!(get("Limit"), Some("10"));

        let opts = QueryOptions {
            max_rating: Some(6.0),
            limit: Some(10),
            ..Default::default()
        };
        let q = EmbyClient::query_params("Movie", &opts);
        assert!(q.iter().all(|(k, _)| *k != "Limit"));
    }
}
