//! Radarr, Sonarr and Lidarr. The three share the same API shape, so one
//! adapter serves all of them and picks endpoints by client type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::media::*;

use super::config::{Capabilities, ClientConfig, ClientType};
use super::error::{json_response, ProviderError, ProviderResult};
use super::provider::{reject_people_filter, Provider};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrImage {
    pub cover_type: String,
    pub remote_url: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrRatingValue {
    pub value: Option<f32>,
}

/// Radarr reports several rating sources, Sonarr and Lidarr a single one.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrRatings {
    pub value: Option<f32>,
    pub tmdb: Option<ArrRatingValue>,
    pub imdb: Option<ArrRatingValue>,
}

impl ArrRatings {
    fn value(&self) -> Option<f32> {
        self.value
            .or_else(|| self.tmdb.as_ref().and_then(|r| r.value))
            .or_else(|| self.imdb.as_ref().and_then(|r| r.value))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrSeasonStatistics {
    pub episode_count: i32,
    pub total_episode_count: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrSeason {
    pub season_number: i32,
    pub monitored: bool,
    pub statistics: Option<ArrSeasonStatistics>,
}

/// Union of the movie, series, artist and album resources.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrResource {
    pub id: i64,
    pub title: Option<String>,
    pub artist_name: Option<String>,
    pub overview: Option<String>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub studio: Option<String>,
    pub network: Option<String>,
    pub status: Option<String>,
    pub certification: Option<String>,
    /// Minutes.
    pub runtime: Option<i64>,
    pub added: Option<DateTime<Utc>>,
    pub release_date: Option<DateTime<Utc>>,
    pub in_cinemas: Option<DateTime<Utc>>,
    pub first_aired: Option<DateTime<Utc>>,
    pub images: Vec<ArrImage>,
    pub ratings: Option<ArrRatings>,
    pub tmdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
    pub foreign_artist_id: Option<String>,
    pub foreign_album_id: Option<String>,
    pub artist_id: Option<i64>,
    pub artist: Option<Box<ArrResource>>,
    pub seasons: Vec<ArrSeason>,
    pub youtube_trailer_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrEpisode {
    pub id: i64,
    pub series_id: i64,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub season_number: i32,
    pub episode_number: i32,
    pub air_date_utc: Option<DateTime<Utc>>,
    pub runtime: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SystemStatus {
    app_name: Option<String>,
    version: String,
}

impl ArrResource {
    fn image(&self, cover_type: &str) -> Option<String> {
        self.images
            .iter()
            .find(|i| i.cover_type == cover_type)
            .and_then(|i| i.remote_url.clone().or_else(|| i.url.clone()))
    }

    fn details(&self) -> Details {
        let title = self
            .title
            .clone()
            .or_else(|| self.artist_name.clone())
            .unwrap_or_default();
        let mut d = Details::titled(title);
        d.description = self.overview.clone().unwrap_or_default();
        let date = self.release_date.or(self.in_cinemas).or(self.first_aired);
        d.set_release_date(date.map(|dt| dt.date_naive()));
        if d.release_year.is_none() {
            d.release_year = self.year.filter(|y| *y > 0);
        }
        d.genres = self.genres.clone();
        d.studios = self.studio.iter().cloned().collect();
        d.content_rating = self.certification.clone();
        d.duration = self.runtime.filter(|m| *m > 0).map(|m| m * 60);
        d.added_at = self.added;
        d.community_rating = self.ratings.as_ref().and_then(|r| r.value());
        d.artwork.poster = self.image("poster").or_else(|| self.image("cover"));
        d.artwork.backdrop = self.image("fanart");
        d.external_ids.tmdb = self.tmdb_id.map(|i| i.to_string());
        d.external_ids.imdb = self.imdb_id.clone();
        d.external_ids.tvdb = self.tvdb_id.map(|i| i.to_string());
        d.external_ids.musicbrainz = self
            .foreign_album_id
            .clone()
            .or_else(|| self.foreign_artist_id.clone());
        d
    }

    pub fn to_movie(&self) -> Movie {
        Movie {
            details: self.details(),
            cast: Vec::new(),
            crew: Vec::new(),
            trailer_url: self
                .youtube_trailer_id
                .as_ref()
                .filter(|id| !id.is_empty())
                .map(|id| format!("https://www.youtube.com/watch?v={}", id)),
        }
    }

    pub fn to_series(&self) -> Series {
        let seasons: Vec<&ArrSeason> = self.seasons.iter().filter(|s| s.season_number > 0).collect();
        Series {
            details: self.details(),
            season_count: seasons.len() as i32,
            episode_count: seasons
                .iter()
                .filter_map(|s| s.statistics.as_ref())
                .map(|s| s.total_episode_count)
                .sum(),
            status: self.status.clone(),
            network: self.network.clone(),
            cast: Vec::new(),
            creators: Vec::new(),
        }
    }

    pub fn to_artist(&self) -> Artist {
        Artist {
            details: self.details(),
            album_count: 0,
        }
    }

    pub fn to_album(&self) -> Album {
        Album {
            details: self.details(),
            artist_id: self.artist_id.map(|i| i.to_string()),
            artist_name: self.artist.as_ref().and_then(|a| a.artist_name.clone()),
            track_count: 0,
        }
    }
}

pub struct ArrClient {
    client_id: i64,
    client_type: ClientType,
    capabilities: Capabilities,
    host: String,
    api_key: String,
    client: Client,
}

impl ArrClient {
    pub fn new(config: &ClientConfig, client: Client) -> ProviderResult<Self> {
        match config.client_type {
            ClientType::Radarr | ClientType::Sonarr | ClientType::Lidarr => {}
            other => {
                return Err(ProviderError::InvalidConfig(format!(
                    "{} is not an automation client",
                    other
                )))
            }
        }
        let api_key = config
            .settings
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::InvalidConfig("missing api key".to_string()))?;
        Ok(Self {
            client_id: config.id,
            client_type: config.client_type,
            capabilities: config.capabilities(),
            host: config.settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn api_base(&self) -> &'static str {
        match self.client_type {
            ClientType::Lidarr => "/api/v1",
            _ => "/api/v3",
        }
    }

    fn headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", HeaderValue::from_str(&self.api_key)?);
        Ok(headers)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ProviderResult<T> {
        let url = format!("{}{}{}", self.host, self.api_base(), path);
        debug!(client = self.client_id, kind = %self.client_type, path = path, "arr request");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .query(query)
            .send()
            .await?;
        json_response(resp).await
    }

    fn wrap<T: MediaData>(&self, id: i64, data: T) -> MediaItem<T> {
        MediaItem::from_client(self.client_id, self.client_type, id.to_string(), data)
    }

    fn collect<T: MediaData>(
        &self,
        resources: &[ArrResource],
        options: &QueryOptions,
        map: impl Fn(&ArrResource) -> T,
    ) -> Vec<MediaItem<T>> {
        resources
            .iter()
            .map(|r| self.wrap(r.id, map(r)))
            .filter(|i| options.matches(i.data.details()))
            .collect()
    }

    fn expect_type(&self, wanted: ClientType, feature: &str) -> ProviderResult<()> {
        if self.client_type != wanted {
            return Err(ProviderError::unsupported(feature));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for ArrClient {
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
        let status: SystemStatus = self.get("/system/status", &[]).await?;
        debug!(
            client = self.client_id,
            app = status.app_name.as_deref().unwrap_or("unknown"),
            version = %status.version,
            "connected"
        );
        Ok(())
    }

    async fn get_movies(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Movie>>> {
        self.expect_type(ClientType::Radarr, "movies")?;
        reject_people_filter(options)?;
        let movies: Vec<ArrResource> = self.get("/movie", &[]).await?;
        Ok(self.collect(&movies, options, ArrResource::to_movie))
    }

    async fn get_movie(&self, id: &str) -> ProviderResult<MediaItem<Movie>> {
        self.expect_type(ClientType::Radarr, "movies")?;
        let movie: ArrResource = self.get(&format!("/movie/{}", id), &[]).await?;
        Ok(self.wrap(movie.id, movie.to_movie()))
    }

    async fn get_series_list(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Series>>> {
        self.expect_type(ClientType::Sonarr, "series")?;
        reject_people_filter(options)?;
        let series: Vec<ArrResource> = self.get("/series", &[]).await?;
        Ok(self.collect(&series, options, ArrResource::to_series))
    }

    async fn get_series(&self, id: &str) -> ProviderResult<MediaItem<Series>> {
        self.expect_type(ClientType::Sonarr, "series")?;
        let series: ArrResource = self.get(&format!("/series/{}", id), &[]).await?;
        Ok(self.wrap(series.id, series.to_series()))
    }

    async fn get_seasons(&self, series_id: &str) -> ProviderResult<Vec<MediaItem<Season>>> {
        self.expect_type(ClientType::Sonarr, "series")?;
        let series: ArrResource = self.get(&format!("/series/{}", series_id), &[]).await?;
        Ok(series
            .seasons
            .iter()
            .map(|s| {
                let title = if s.season_number == 0 {
                    "Specials".to_string()
                } else {
                    format!("Season {}", s.season_number)
                };
                // seasons have no id of their own in sonarr
                let external = format!("{}:{}", series.id, s.season_number);
                MediaItem::from_client(
                    self.client_id,
                    self.client_type,
                    external,
                    Season {
                        details: Details::titled(title),
                        series_id: series_id.to_string(),
                        number: s.season_number,
                        episode_count: s.statistics.as_ref().map(|st| st.total_episode_count).unwrap_or(0),
                    },
                )
            })
            .collect())
    }

    async fn get_episodes(&self, series_id: &str, season: i32) -> ProviderResult<Vec<MediaItem<Episode>>> {
        self.expect_type(ClientType::Sonarr, "series")?;
        let episodes: Vec<ArrEpisode> = self
            .get(
                "/episode",
                &[("seriesId", series_id.to_string()), ("seasonNumber", season.to_string())],
            )
            .await?;
        Ok(episodes
            .iter()
            .filter(|e| e.season_number == season)
            .map(|e| {
                let mut d = Details::titled(e.title.clone().unwrap_or_default());
                d.description = e.overview.clone().unwrap_or_default();
                d.set_release_date(e.air_date_utc.map(|dt| dt.date_naive()));
                d.duration = e.runtime.map(|m| m * 60);
                self.wrap(
                    e.id,
                    Episode {
                        details: d,
                        series_id: e.series_id.to_string(),
                        series_title: None,
                        season_number: e.season_number,
                        episode_number: e.episode_number,
                    },
                )
            })
            .collect())
    }

    async fn get_artists(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Artist>>> {
        self.expect_type(ClientType::Lidarr, "artists")?;
        reject_people_filter(options)?;
        let artists: Vec<ArrResource> = self.get("/artist", &[]).await?;
        Ok(self.collect(&artists, options, ArrResource::to_artist))
    }

    async fn get_artist(&self, id: &str) -> ProviderResult<MediaItem<Artist>> {
        self.expect_type(ClientType::Lidarr, "artists")?;
        let artist: ArrResource = self.get(&format!("/artist/{}", id), &[]).await?;
        Ok(self.wrap(artist.id, artist.to_artist()))
    }

    async fn get_albums(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Album>>> {
        self.expect_type(ClientType::Lidarr, "albums")?;
        reject_people_filter(options)?;
        let mut query = Vec::new();
        if let Some(ref artist_id) = options.external_source_id {
            query.push(("artistId", artist_id.clone()));
        }
        let albums: Vec<ArrResource> = self.get("/album", &query).await?;
        Ok(self.collect(&albums, options, ArrResource::to_album))
    }

    async fn get_album(&self, id: &str) -> ProviderResult<MediaItem<Album>> {
        self.expect_type(ClientType::Lidarr, "albums")?;
        let album: ArrResource = self.get(&format!("/album/{}", id), &[]).await?;
        Ok(self.wrap(album.id, album.to_album()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientSettings;

    #[test]
    fn test_radarr_movie_mapping() {
        let json = r#"{"id": 12, "title": "Arrival", "year": 2016, "runtime": 116,
            "genres": ["Drama", "Science Fiction"], "studio": "Paramount",
            "inCinemas": "2016-11-10T00:00:00Z", "tmdbId": 329865, "imdbId": "tt2543164",
            "ratings": {"imdb": {"votes": 10, "value": 7.9}, "tmdb": {"votes": 5, "value": 7.6}},
            "images": [{"coverType": "poster", "remoteUrl": "http://img/p.jpg"}],
            "youtubeTrailerId": "abc"}"#;
        let r: ArrResource = serde_json::from_str(json).unwrap();
        let movie = r.to_movie();
        assert_eq!(movie.details.title, "Arrival");
        assert_eq!(movie.details.release_year, Some(2016));
        assert_eq!(movie.details.duration, Some(116 * 60));
        assert_eq!(movie.details.community_rating, Some(7.6));
        assert_eq!(movie.details.artwork.poster.as_deref(), Some("http://img/p.jpg"));
        assert_eq!(movie.details.external_ids.tmdb.as_deref(), Some("329865"));
        assert_eq!(movie.trailer_url.as_deref(), Some("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn test_sonarr_series_skips_specials() {
        let json = r#"{"id": 3, "title": "Severance", "year": 2022, "network": "Apple TV+",
            "ratings": {"votes": 100, "value": 8.7},
            "seasons": [
                {"seasonNumber": 0, "statistics": {"totalEpisodeCount": 2}},
                {"seasonNumber": 1, "statistics": {"totalEpisodeCount": 9}},
                {"seasonNumber": 2, "statistics": {"totalEpisodeCount": 10}}
            ]}"#;
        let r: ArrResource = serde_json::from_str(json).unwrap();
        let series = r.to_series();
        assert_eq!(series.season_count, 2);
        assert_eq!(series.episode_count, 19);
        assert_eq!(series.details.community_rating, Some(8.7));
        assert_eq!(series.network.as_deref(), Some("Apple TV+"));
    }

    #[tokio::test]
    async fn test_wrong_domain_is_unsupported() {
        let cfg = ClientConfig::new(
            1,
            "radarr",
            ClientType::Radarr,
            ClientSettings {
                base_url: "http://radarr:7878".to_string(),
                api_key: Some("k".to_string()),
                ..Default::default()
            },
        );
        let client = ArrClient::new(&cfg, Client::new()).unwrap();
        let res = client.get_series_list(&QueryOptions::default()).await;
        assert!(matches!(res, Err(ProviderError::Unsupported(_))));

        // no cast data, so a person query must not fall back to the full library
        let opts = QueryOptions {
            actor: Some("Keanu Reeves".to_string()),
            ..Default::default()
        };
        let res = client.get_movies(&opts).await;
        assert!(matches!(res, Err(ProviderError::Unsupported(_))));
    }
}
