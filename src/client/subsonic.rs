//! Subsonic (and OpenSubsonic / Navidrome) adapter. Music and playlists only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::media::*;

use super::config::{Capabilities, ClientConfig, ClientType};
use super::error::{json_response, ProviderError, ProviderResult};
use super::provider::{reject_people_filter, Provider};

const API_VERSION: &str = "1.16.1";
const CLIENT_NAME: &str = "mediahub";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub album: Option<String>,
    pub album_id: Option<String>,
    pub artist: Option<String>,
    pub artist_id: Option<String>,
    pub track: Option<i32>,
    pub disc_number: Option<i32>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    /// Seconds.
    pub duration: Option<i64>,
    pub created: Option<DateTime<Utc>>,
    pub starred: Option<DateTime<Utc>>,
    pub user_rating: Option<f32>,
    pub play_count: Option<i64>,
    pub cover_art: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlbumId3 {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    pub artist_id: Option<String>,
    pub song_count: i32,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub duration: Option<i64>,
    pub created: Option<DateTime<Utc>>,
    pub starred: Option<DateTime<Utc>>,
    pub user_rating: Option<f32>,
    pub play_count: Option<i64>,
    pub song: Vec<Song>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtistId3 {
    pub id: String,
    pub name: String,
    pub album_count: i32,
    pub starred: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubsonicPlaylist {
    pub id: String,
    pub name: String,
    pub comment: Option<String>,
    pub song_count: i32,
    pub duration: Option<i64>,
    pub created: Option<DateTime<Utc>>,
    pub changed: Option<DateTime<Utc>>,
    pub entry: Vec<Song>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResult3 {
    song: Vec<Song>,
    album: Vec<AlbumId3>,
    artist: Vec<ArtistId3>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlbumList2 {
    album: Vec<AlbumId3>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArtistIndex {
    artist: Vec<ArtistId3>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Artists {
    index: Vec<ArtistIndex>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Playlists {
    playlist: Vec<SubsonicPlaylist>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    status: String,
    error: Option<ApiError>,
    #[serde(flatten)]
    payload: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "subsonic-response")]
    response: ResponseBody,
}

impl Song {
    pub fn to_track(&self) -> Track {
        let mut d = Details::titled(self.title.clone());
        d.release_year = self.year;
        d.genres = self.genre.iter().cloned().collect();
        d.duration = self.duration;
        d.added_at = self.created;
        d.is_favorite = self.starred.is_some();
        // Subsonic rates 1-5, the item model uses 0-10
        d.user_rating = self.user_rating.map(|r| r * 2.0);
        d.popularity = self.play_count.map(|c| c as f32);
        d.artwork.thumbnail = self.cover_art.clone();
        Track {
            details: d,
            album_id: self.album_id.clone(),
            album_name: self.album.clone(),
            artist_id: self.artist_id.clone(),
            artist_name: self.artist.clone(),
            number: self.track,
            disc_number: self.disc_number,
        }
    }
}

impl AlbumId3 {
    pub fn to_album(&self) -> Album {
        let mut d = Details::titled(self.name.clone());
        d.release_year = self.year;
        d.genres = self.genre.iter().cloned().collect();
        d.duration = self.duration;
        d.added_at = self.created;
        d.is_favorite = self.starred.is_some();
        d.user_rating = self.user_rating.map(|r| r * 2.0);
        d.popularity = self.play_count.map(|c| c as f32);
        Album {
            details: d,
            artist_id: self.artist_id.clone(),
            artist_name: self.artist.clone(),
            track_count: self.song_count,
        }
    }
}

impl ArtistId3 {
    pub fn to_artist(&self) -> Artist {
        let mut d = Details::titled(self.name.clone());
        d.is_favorite = self.starred.is_some();
        Artist {
            details: d,
            album_count: self.album_count,
        }
    }
}

/// Decodes a Subsonic envelope and pulls out `key`.
fn extract<T: serde::de::DeserializeOwned + Default>(env: Envelope, key: &str) -> ProviderResult<T> {
    let body = env.response;
    if body.status != "ok" {
        let err = body.error.map(|e| (e.code, e.message));
        return match err {
            Some((40, msg)) | Some((41, msg)) => Err(ProviderError::Auth(msg)),
            Some((70, msg)) => Err(ProviderError::NotFound(msg)),
            Some((code, msg)) => Err(ProviderError::Api(format!("subsonic error {}: {}", code, msg))),
            None => Err(ProviderError::Api("subsonic request failed".to_string())),
        };
    }
    if key.is_empty() {
        return Ok(T::default());
    }
    match body.payload.get(key) {
        Some(v) => Ok(serde_json::from_value(v.clone())?),
        None => Ok(T::default()),
    }
}

pub struct SubsonicClient {
    client_id: i64,
    capabilities: Capabilities,
    host: String,
    username: String,
    password: String,
    client: Client,
}

impl SubsonicClient {
    pub fn new(config: &ClientConfig, client: Client) -> ProviderResult<Self> {
        let username = config
            .settings
            .username
            .clone()
            .ok_or_else(|| ProviderError::InvalidConfig("missing username".to_string()))?;
        let password = config
            .settings
            .password
            .clone()
            .ok_or_else(|| ProviderError::InvalidConfig("missing password".to_string()))?;
        Ok(Self {
            client_id: config.id,
            capabilities: config.capabilities(),
            host: config.settings.base_url.trim_end_matches('/').to_string(),
            username,
            password,
            client,
        })
    }

    fn auth_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("u", self.username.clone()),
            ("p", format!("enc:{}", hex::encode(self.password.as_bytes()))),
            ("v", API_VERSION.to_string()),
            ("c", CLIENT_NAME.to_string()),
            ("f", "json".to_string()),
        ]
    }

    async fn call<T: serde::de::DeserializeOwned + Default>(
        &self,
        method: &str,
        key: &str,
        params: &[(&str, String)],
    ) -> ProviderResult<T> {
        let url = format!("{}/rest/{}.view", self.host, method);
        debug!(client = self.client_id, method = method, "subsonic call");
        let resp = self
            .client
            .get(&url)
            .query(&self.auth_params())
            .query(params)
            .send()
            .await?;
        let env: Envelope = json_response(resp).await?;
        extract(env, key)
    }

    async fn search(&self, query: &str, songs: usize, albums: usize, artists: usize, offset: usize) -> ProviderResult<SearchResult3> {
        self.call(
            "search3",
            "searchResult3",
            &[
                ("query", query.to_string()),
                ("songCount", songs.to_string()),
                ("songOffset", offset.to_string()),
                ("albumCount", albums.to_string()),
                ("albumOffset", offset.to_string()),
                ("artistCount", artists.to_string()),
                ("artistOffset", offset.to_string()),
            ],
        )
        .await
    }

    async fn raw_playlist(&self, id: &str) -> ProviderResult<SubsonicPlaylist> {
        self.call("getPlaylist", "playlist", &[("id", id.to_string())]).await
    }

    fn wrap<T: MediaData>(&self, id: &str, data: T) -> MediaItem<T> {
        MediaItem::from_client(self.client_id, ClientType::Subsonic, id.to_string(), data)
    }

    fn to_playlist(&self, p: &SubsonicPlaylist) -> MediaItem<Playlist> {
        let mut d = Details::titled(p.name.clone());
        d.description = p.comment.clone().unwrap_or_default();
        d.duration = p.duration;
        d.added_at = p.created;
        d.updated_at = p.changed;
        let list = ListData::from_item_ids(p.entry.iter().map(|s| s.id.clone()));
        self.wrap(&p.id, Playlist { details: d, list })
    }

    fn page(options: &QueryOptions) -> (usize, usize) {
        (options.provider_limit().unwrap_or(50), 0)
    }
}

#[async_trait]
impl Provider for SubsonicClient {
    fn client_id(&self) -> i64 {
        self.client_id
    }

    fn client_type(&self) -> ClientType {
        ClientType::Subsonic
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        let _: Value = self.call("ping", "", &[]).await?;
        Ok(())
    }

    async fn get_tracks(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Track>>> {
        reject_people_filter(options)?;
        let (size, offset) = Self::page(options);
        let songs = if options.favorites {
            #[derive(Default, Deserialize)]
            #[serde(default)]
            struct Starred {
                song: Vec<Song>,
            }
            let starred: Starred = self.call("getStarred2", "starred2", &[]).await?;
            starred.song
        } else if let Some(ref album_id) = options.external_source_id {
            let album: AlbumId3 = self.call("getAlbum", "album", &[("id", album_id.clone())]).await?;
            album.song
        } else {
            let query = options.query.clone().unwrap_or_default();
            self.search(&query, size, 0, 0, offset).await?.song
        };
        Ok(songs
            .iter()
            .map(|s| self.wrap(&s.id, s.to_track()))
            .filter(|t| options.matches(t.data.details()))
            .collect())
    }

    async fn get_track(&self, id: &str) -> ProviderResult<MediaItem<Track>> {
        let song: Song = self.call("getSong", "song", &[("id", id.to_string())]).await?;
        if song.id.is_empty() {
            return Err(ProviderError::NotFound(format!("subsonic song {}", id)));
        }
        Ok(self.wrap(&song.id, song.to_track()))
    }

    async fn get_albums(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Album>>> {
        reject_people_filter(options)?;
        let (size, offset) = Self::page(options);
        let albums = if let Some(ref query) = options.query {
            self.search(query, 0, size, 0, offset).await?.album
        } else {
            let mut params = vec![("size", size.to_string()), ("offset", offset.to_string())];
            let list_type = if options.favorites {
                "starred"
            } else if let Some(ref genre) = options.genre {
                params.push(("genre", genre.clone()));
                "byGenre"
            } else if let Some(year) = options.year {
                params.push(("fromYear", year.to_string()));
                params.push(("toYear", year.to_string()));
                "byYear"
            } else if options.recently_added {
                "newest"
            } else {
                match options.sort {
                    Some(SortField::Rating) => "highest",
                    Some(SortField::Popularity) => "frequent",
                    Some(SortField::Title) => "alphabeticalByName",
                    _ => "newest",
                }
            };
            params.push(("type", list_type.to_string()));
            let list: AlbumList2 = self.call("getAlbumList2", "albumList2", &params).await?;
            list.album
        };
        Ok(albums
            .iter()
            .map(|a| self.wrap(&a.id, a.to_album()))
            .filter(|a| options.matches(a.data.details()))
            .collect())
    }

    async fn get_album(&self, id: &str) -> ProviderResult<MediaItem<Album>> {
        let album: AlbumId3 = self.call("getAlbum", "album", &[("id", id.to_string())]).await?;
        if album.id.is_empty() {
            return Err(ProviderError::NotFound(format!("subsonic album {}", id)));
        }
        Ok(self.wrap(&album.id, album.to_album()))
    }

    async fn get_artists(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Artist>>> {
        reject_people_filter(options)?;
        let (size, offset) = Self::page(options);
        let artists = if let Some(ref query) = options.query {
            self.search(query, 0, 0, size, offset).await?.artist
        } else {
            let artists: Artists = self.call("getArtists", "artists", &[]).await?;
            artists.index.into_iter().flat_map(|i| i.artist).collect()
        };
        Ok(artists
            .iter()
            .map(|a| self.wrap(&a.id, a.to_artist()))
            .filter(|a| !options.favorites || a.data.details.is_favorite)
            .collect())
    }

    async fn get_artist(&self, id: &str) -> ProviderResult<MediaItem<Artist>> {
        let artist: ArtistId3 = self.call("getArtist", "artist", &[("id", id.to_string())]).await?;
        if artist.id.is_empty() {
            return Err(ProviderError::NotFound(format!("subsonic artist {}", id)));
        }
        Ok(self.wrap(&artist.id, artist.to_artist()))
    }

    async fn get_playlists(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Playlist>>> {
        let playlists: Playlists = self.call("getPlaylists", "playlists", &[]).await?;
        Ok(playlists
            .playlist
            .iter()
            .map(|p| self.to_playlist(p))
            .filter(|p| options.matches(p.data.details()))
            .collect())
    }

    async fn get_playlist(&self, id: &str) -> ProviderResult<MediaItem<Playlist>> {
        let p = self.raw_playlist(id).await?;
        if p.id.is_empty() {
            return Err(ProviderError::NotFound(format!("subsonic playlist {}", id)));
        }
        Ok(self.to_playlist(&p))
    }

    async fn create_playlist(&self, name: &str, description: &str) -> ProviderResult<MediaItem<Playlist>> {
        let created: SubsonicPlaylist = self
            .call("createPlaylist", "playlist", &[("name", name.to_string())])
            .await?;
        let id = if created.id.is_empty() {
            // servers older than 1.14 return an empty body; find it by name
            let playlists: Playlists = self.call("getPlaylists", "playlists", &[]).await?;
            playlists
                .playlist
                .into_iter()
                .filter(|p| p.name == name)
                .max_by_key(|p| p.created)
                .map(|p| p.id)
                .ok_or_else(|| ProviderError::Api("created playlist not found".to_string()))?
        } else {
            created.id
        };
        if !description.is_empty() {
            self.update_playlist(&id, name, description).await?;
        }
        self.get_playlist(&id).await
    }

    async fn update_playlist(&self, id: &str, name: &str, description: &str) -> ProviderResult<()> {
        let _: Value = self
            .call(
                "updatePlaylist",
                "",
                &[
                    ("playlistId", id.to_string()),
                    ("name", name.to_string()),
                    ("comment", description.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete_playlist(&self, id: &str) -> ProviderResult<()> {
        let _: Value = self.call("deletePlaylist", "", &[("id", id.to_string())]).await?;
        Ok(())
    }

    async fn add_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        let _: Value = self
            .call(
                "updatePlaylist",
                "",
                &[("playlistId", id.to_string()), ("songIdToAdd", item_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn remove_playlist_item(&self, id: &str, item_id: &str) -> ProviderResult<()> {
        let p = self.raw_playlist(id).await?;
        let index = p
            .entry
            .iter()
            .position(|s| s.id == item_id)
            .ok_or_else(|| ProviderError::NotFound(format!("song {} in playlist {}", item_id, id)))?;
        let _: Value = self
            .call(
                "updatePlaylist",
                "",
                &[("playlistId", id.to_string()), ("songIndexToRemove", index.to_string())],
            )
            .await?;
        Ok(())
    }

    /// createPlaylist with an existing id replaces the song list.
    async fn reorder_playlist_items(&self, id: &str, item_ids: &[String]) -> ProviderResult<()> {
        let mut params = vec![("playlistId", id.to_string())];
        params.extend(item_ids.iter().map(|s| ("songId", s.clone())));
        let _: Value = self.call("createPlaylist", "", &params).await?;
        Ok(())
    }
}
