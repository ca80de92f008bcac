//! The Movie Database adapter. Read-only metadata for movies and series.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::media::*;

use super::config::{Capabilities, ClientConfig, ClientType};
use super::error::{json_response, ProviderError, ProviderResult};
use super::provider::Provider;

pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CastMember {
    pub name: String,
    pub character: Option<String>,
    pub job: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Credits {
    pub cast: Vec<CastMember>,
    pub crew: Vec<CastMember>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Company {
    pub name: String,
}

/// Movie and TV results share most fields; TV uses `name` and
/// `first_air_date` where movies use `title` and `release_date`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TmdbItem {
    pub id: i64,
    pub title: Option<String>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub first_air_date: Option<String>,
    pub genre_ids: Vec<i64>,
    pub genres: Vec<Genre>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: Option<f32>,
    pub popularity: Option<f32>,
    pub runtime: Option<i64>,
    pub imdb_id: Option<String>,
    pub production_companies: Vec<Company>,
    pub networks: Vec<Company>,
    pub created_by: Vec<CastMember>,
    pub number_of_seasons: Option<i32>,
    pub number_of_episodes: Option<i32>,
    pub status: Option<String>,
    pub credits: Option<Credits>,
    pub seasons: Vec<TmdbSeason>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TmdbSeason {
    pub id: i64,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub season_number: i32,
    pub episode_count: Option<i32>,
    pub poster_path: Option<String>,
    pub episodes: Vec<TmdbEpisode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TmdbEpisode {
    pub id: i64,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    pub season_number: i32,
    pub episode_number: i32,
    pub runtime: Option<i64>,
    pub still_path: Option<String>,
    pub vote_average: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Page {
    results: Vec<TmdbItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PersonRef {
    id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PersonPage {
    results: Vec<PersonRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenreList {
    genres: Vec<Genre>,
}

fn image(path: &Option<String>, size: &str) -> Option<String> {
    path.as_ref().map(|p| format!("{}/{}{}", IMAGE_BASE_URL, size, p))
}

impl TmdbItem {
    fn details(&self, genre_names: &[Genre]) -> Details {
        let title = self.title.clone().or_else(|| self.name.clone()).unwrap_or_default();
        let mut d = Details::titled(title);
        d.description = self.overview.clone().unwrap_or_default();
        let date = self.release_date.as_deref().or(self.first_air_date.as_deref());
        d.set_release_date(date.and_then(Details::parse_date));
        d.genres = if self.genres.is_empty() {
            self.genre_ids
                .iter()
                .filter_map(|id| genre_names.iter().find(|g| g.id == *id).map(|g| g.name.clone()))
                .collect()
        } else {
            self.genres.iter().map(|g| g.name.clone()).collect()
        };
        d.studios = self
            .production_companies
            .iter()
            .map(|c| c.name.clone())
            .collect();
        d.duration = self.runtime.map(|m| m * 60);
        d.community_rating = self.vote_average;
        d.popularity = self.popularity;
        d.artwork.poster = image(&self.poster_path, "w500");
        d.artwork.backdrop = image(&self.backdrop_path, "original");
        d.external_ids.tmdb = Some(self.id.to_string());
        d.external_ids.imdb = self.imdb_id.clone();
        d
    }

    fn cast(&self) -> Vec<Person> {
        self.credits
            .iter()
            .flat_map(|c| c.cast.iter())
            .map(|c| Person {
                name: c.name.clone(),
                role: Some("Actor".to_string()),
                character: c.character.clone(),
            })
            .collect()
    }

    pub fn to_movie(&self, genre_names: &[Genre]) -> Movie {
        Movie {
            details: self.details(genre_names),
            cast: self.cast(),
            crew: self
                .credits
                .iter()
                .flat_map(|c| c.crew.iter())
                .map(|c| Person {
                    name: c.name.clone(),
                    role: c.job.clone(),
                    character: None,
                })
                .collect(),
            trailer_url: None,
        }
    }

    pub fn to_series(&self, genre_names: &[Genre]) -> Series {
        Series {
            details: self.details(genre_names),
            season_count: self.number_of_seasons.unwrap_or(self.seasons.len() as i32),
            episode_count: self.number_of_episodes.unwrap_or(0),
            status: self.status.clone(),
            network: self.networks.first().map(|n| n.name.clone()),
            cast: self.cast(),
            creators: self
                .created_by
                .iter()
                .map(|c| Person {
                    name: c.name.clone(),
                    role: Some("Creator".to_string()),
                    character: None,
                })
                .collect(),
        }
    }
}

pub struct TmdbClient {
    client_id: i64,
    capabilities: Capabilities,
    host: String,
    api_key: String,
    client: Client,
    movie_genres: OnceCell<Vec<Genre>>,
    tv_genres: OnceCell<Vec<Genre>>,
}

impl TmdbClient {
    pub fn new(config: &ClientConfig, client: Client) -> ProviderResult<Self> {
        let api_key = config
            .settings
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::InvalidConfig("missing api key".to_string()))?;
        let host = match config.settings.base_url.trim() {
            "" => DEFAULT_BASE_URL.to_string(),
            url => url.trim_end_matches('/').to_string(),
        };
        Ok(Self {
            client_id: config.id,
            capabilities: config.capabilities(),
            host,
            api_key,
            client,
            movie_genres: OnceCell::new(),
            tv_genres: OnceCell::new(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ProviderResult<T> {
        let url = format!("{}{}", self.host, path);
        debug!(client = self.client_id, path = path, "tmdb request");
        let resp = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;
        json_response(resp).await
    }

    async fn genres(&self, kind: &str) -> ProviderResult<&[Genre]> {
        let cell = if kind == "movie" { &self.movie_genres } else { &self.tv_genres };
        let list = cell
            .get_or_try_init(|| async {
                let list: GenreList = self.get(&format!("/genre/{}/list", kind), &[]).await?;
                Ok::<_, ProviderError>(list.genres)
            })
            .await?;
        Ok(list.as_slice())
    }

    async fn person_id(&self, name: &str) -> ProviderResult<Option<i64>> {
        let page: PersonPage = self.get("/search/person", &[("query", name.to_string())]).await?;
        Ok(page.results.first().map(|p| p.id))
    }

    /// Picks the endpoint that best matches the options: search when there
    /// is a query, discover when filtering, else a ranked list. Person
    /// filters always go through discover, which only movies support.
    async fn listing(&self, kind: &str, options: &QueryOptions) -> ProviderResult<Vec<TmdbItem>> {
        if options.filters_people() && kind != "movie" {
            return Err(ProviderError::unsupported("tv person filters"));
        }
        let page = options
            .provider_limit()
            .map(|l| ((l.max(1) - 1) / 20 + 1).min(5))
            .unwrap_or(1);
        let mut params: Vec<(&str, String)> = Vec::new();
        let discover = options.genre.is_some()
            || options.year.is_some()
            || options.min_rating.is_some()
            || options.filters_people();
        let path = if let (Some(q), false) = (options.query.as_ref(), options.filters_people()) {
            params.push(("query", q.clone()));
            if let Some(year) = options.year {
                let key = if kind == "movie" { "year" } else { "first_air_date_year" };
                params.push((key, year.to_string()));
            }
            format!("/search/{}", kind)
        } else if discover {
            for (name, key) in [(&options.actor, "with_cast"), (&options.creator, "with_crew")] {
                if let Some(name) = name {
                    match self.person_id(name).await? {
                        Some(id) => params.push((key, id.to_string())),
                        None => return Ok(Vec::new()),
                    }
                }
            }
            if let Some(ref genre) = options.genre {
                let genres = self.genres(kind).await?;
                let id = genres
                    .iter()
                    .find(|g| g.name.eq_ignore_ascii_case(genre))
                    .map(|g| g.id)
                    .ok_or_else(|| ProviderError::NotFound(format!("tmdb genre {}", genre)))?;
                params.push(("with_genres", id.to_string()));
            }
            if let Some(year) = options.year {
                let key = if kind == "movie" { "primary_release_year" } else { "first_air_date_year" };
                params.push((key, year.to_string()));
            }
            if let Some(min) = options.min_rating {
                params.push(("vote_average.gte", min.to_string()));
            }
            let sort = match options.sort {
                Some(SortField::Rating) => "vote_average.desc",
                Some(SortField::ReleaseYear) | Some(SortField::AddedAt) => {
                    if kind == "movie" {
                        "primary_release_date.desc"
                    } else {
                        "first_air_date.desc"
                    }
                }
                _ => "popularity.desc",
            };
            params.push(("sort_by", sort.to_string()));
            format!("/discover/{}", kind)
        } else {
            let list = match (options.sort, options.recently_added, kind) {
                (_, true, "movie") => "now_playing",
                (_, true, _) => "on_the_air",
                (Some(SortField::Rating), _, _) => "top_rated",
                _ => "popular",
            };
            format!("/{}/{}", kind, list)
        };

        let mut out = Vec::new();
        for n in 1..=page {
            let mut query = params.clone();
            query.push(("page", n.to_string()));
            let page: Page = self.get(&path, &query).await?;
            let done = page.results.len() < 20;
            out.extend(page.results);
            if done {
                break;
            }
        }
        Ok(out)
    }

    fn wrap<T: MediaData>(&self, id: i64, data: T) -> MediaItem<T> {
        MediaItem::from_client(self.client_id, ClientType::Tmdb, id.to_string(), data)
    }
}

#[async_trait]
impl Provider for TmdbClient {
    fn client_id(&self) -> i64 {
        self.client_id
    }

    fn client_type(&self) -> ClientType {
        ClientType::Tmdb
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        let _: serde_json::Value = self.get("/configuration", &[]).await?;
        Ok(())
    }

    async fn get_movies(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Movie>>> {
        let items = self.listing("movie", options).await?;
        let genres = self.genres("movie").await?;
        Ok(items
            .iter()
            .map(|i| self.wrap(i.id, i.to_movie(genres)))
            .filter(|m| options.matches(m.data.details()))
            .collect())
    }

    async fn get_movie(&self, id: &str) -> ProviderResult<MediaItem<Movie>> {
        let item: TmdbItem = self
            .get(&format!("/movie/{}", id), &[("append_to_response", "credits".to_string())])
            .await?;
        Ok(self.wrap(item.id, item.to_movie(&[])))
    }

    async fn get_series_list(&self, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Series>>> {
        let items = self.listing("tv", options).await?;
        let genres = self.genres("tv").await?;
        Ok(items
            .iter()
            .map(|i| self.wrap(i.id, i.to_series(genres)))
            .filter(|s| options.matches(s.data.details()))
            .collect())
    }

    async fn get_series(&self, id: &str) -> ProviderResult<MediaItem<Series>> {
        let item: TmdbItem = self
            .get(&format!("/tv/{}", id), &[("append_to_response", "credits".to_string())])
            .await?;
        Ok(self.wrap(item.id, item.to_series(&[])))
    }

    async fn get_seasons(&self, series_id: &str) -> ProviderResult<Vec<MediaItem<Season>>> {
        let item: TmdbItem = self.get(&format!("/tv/{}", series_id), &[]).await?;
        Ok(item
            .seasons
            .iter()
            .map(|s| {
                let mut d = Details::titled(s.name.clone().unwrap_or_else(|| format!("Season {}", s.season_number)));
                d.description = s.overview.clone().unwrap_or_default();
                d.set_release_date(s.air_date.as_deref().and_then(Details::parse_date));
                d.artwork.poster = image(&s.poster_path, "w500");
                self.wrap(
                    s.id,
                    Season {
                        details: d,
                        series_id: series_id.to_string(),
                        number: s.season_number,
                        episode_count: s.episode_count.unwrap_or(0),
                    },
                )
            })
            .collect())
    }

    async fn get_episodes(&self, series_id: &str, season: i32) -> ProviderResult<Vec<MediaItem<Episode>>> {
        let s: TmdbSeason = self
            .get(&format!("/tv/{}/season/{}", series_id, season), &[])
            .await?;
        Ok(s.episodes
            .iter()
            .map(|e| {
                let mut d = Details::titled(e.name.clone().unwrap_or_default());
                d.description = e.overview.clone().unwrap_or_default();
                d.set_release_date(e.air_date.as_deref().and_then(Details::parse_date));
                d.duration = e.runtime.map(|m| m * 60);
                d.community_rating = e.vote_average;
                d.artwork.thumbnail = image(&e.still_path, "w300");
                self.wrap(
                    e.id,
                    Episode {
                        details: d,
                        series_id: series_id.to_string(),
                        series_title: None,
                        season_number: e.season_number,
                        episode_number: e.episode_number,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientSettings;

    #[test]
    fn test_movie_mapping() {
        let json = r#"{"id": 603, "title": "The Matrix", "overview": "Neo",
            "release_date": "1999-03-30", "genre_ids": [28, 878],
            "poster_path": "/p.jpg", "vote_average": 8.2, "popularity": 80.5}"#;
        let item: TmdbItem = serde_json::from_str(json).unwrap();
        let genres = vec![
            Genre { id: 28, name: "Action".to_string() },
            Genre { id: 878, name: "Science Fiction".to_string() },
        ];
        let movie = item.to_movie(&genres);
        assert_eq!(movie.details.title, "The Matrix");
        assert_eq!(movie.details.release_year, Some(1999));
        assert_eq!(movie.details.genres, vec!["Action", "Science Fiction"]);
        assert_eq!(movie.details.external_ids.tmdb.as_deref(), Some("603"));
        assert_eq!(
            movie.details.artwork.poster.as_deref(),
            Some("https://image.tmdb.org/t/p/w500/p.jpg")
        );
    }

    async fn mock_tmdb() -> String {
        use std::collections::HashMap;

        use axum::{extract::Query, routing::get, Json, Router};
        use serde_json::json;

        let app = Router::new()
            .route("/genre/movie/list", get(|| async { Json(json!({"genres": []})) }))
            .route(
                "/search/person",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let results = match q.get("query").map(String::as_str) {
                        Some("Keanu Reeves") => json!([{"id": 6384}]),
                        Some("Lana Wachowski") => json!([{"id": 9340}]),
                        _ => json!([]),
                    };
                    Json(json!({"results": results}))
                }),
            )
            .route(
                "/discover/movie",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let cast = q.get("with_cast").map(String::as_str);
                    let crew = q.get("with_crew").map(String::as_str);
                    let results = match (cast, crew) {
                        (Some("6384"), None) => json!([{"id": 603, "title": "The Matrix"}, {"id": 245891, "title": "John Wick"}]),
                        (None, Some("9340")) | (Some("6384"), Some("9340")) => json!([{"id": 603, "title": "The Matrix"}]),
                        _ => json!([]),
                    };
                    Json(json!({"results": results}))
                }),
            )
            .route(
                "/movie/popular",
                get(|| async { Json(json!({"results": [{"id": 346698, "title": "Barbie"}]})) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn mock_client() -> TmdbClient {
        let settings = ClientSettings {
            base_url: mock_tmdb().await,
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        let config = ClientConfig::new(0, "tmdb", ClientType::Tmdb, settings);
        TmdbClient::new(&config, Client::new()).unwrap()
    }

    fn titles(items: &[MediaItem<Movie>]) -> Vec<&str> {
        items.iter().map(|m| m.title()).collect()
    }

    #[tokio::test]
    async fn test_person_filters_use_discover() {
        let tmdb = mock_client().await;

        let opts = QueryOptions {
            actor: Some("Keanu Reeves".to_string()),
            ..Default::default()
        };
        let movies = tmdb.get_movies(&opts).await.unwrap();
        assert_eq!(titles(&movies), vec!["The Matrix", "John Wick"]);

        let opts = QueryOptions {
            creator: Some("Lana Wachowski".to_string()),
            ..Default::default()
        };
        let movies = tmdb.get_movies(&opts).await.unwrap();
        assert_eq!(titles(&movies), vec!["The Matrix"]);

        // a title query narrows discover results instead of replacing them
        let opts = QueryOptions {
            query: Some("wick".to_string()),
            actor: Some("Keanu Reeves".to_string()),
            ..Default::default()
        };
        let movies = tmdb.get_movies(&opts).await.unwrap();
        assert_eq!(titles(&movies), vec!["John Wick"]);

        let movies = tmdb.get_movies(&QueryOptions::default()).await.unwrap();
        assert_eq!(titles(&movies), vec!["Barbie"]);
    }

    #[tokio::test]
    async fn test_unknown_person_and_tv_person_filter() {
        let tmdb = mock_client().await;
        let opts = QueryOptions {
            actor: Some("Nobody Atall".to_string()),
            ..Default::default()
        };
        assert!(tmdb.get_movies(&opts).await.unwrap().is_empty());

        let opts = QueryOptions {
            creator: Some("Greta Gerwig".to_string()),
            ..Default::default()
        };
        let res = tmdb.get_series_list(&opts).await;
        assert!(matches!(res, Err(ProviderError::Unsupported(_))));
    }

    #[test]
    fn test_series_mapping() {
        let json = r#"{"id": 1399, "name": "Game of Thrones", "first_air_date": "2011-04-17",
            "genres": [{"id": 18, "name": "Drama"}], "number_of_seasons": 8,
            "number_of_episodes": 73, "networks": [{"name": "HBO"}],
            "created_by": [{"name": "David Benioff"}]}"#;
        let item: TmdbItem = serde_json::from_str(json).unwrap();
        let series = item.to_series(&[]);
        assert_eq!(series.details.title, "Game of Thrones");
        assert_eq!(series.details.release_year, Some(2011));
        assert_eq!(series.season_count, 8);
        assert_eq!(series.network.as_deref(), Some("HBO"));
        assert_eq!(series.creators[0].name, "David Benioff");
        assert_eq!(series.details.genres, vec!["Drama"]);
    }
}
