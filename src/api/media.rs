use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Router,
};

use crate::error::AppError;
use crate::media::{Episode, MediaItem, Season, Series};
use crate::server::AppState;
use crate::service::{Domain, MediaService, WithUserData};

use super::params::SearchParams;
use super::{ok, ApiResult, AuthUser};

const DEFAULT_RECENT_DAYS: i64 = 7;

/// Aggregated, per-client and stored-item routes for one payload type,
/// mounted under `segment` (e.g. `movies` or `music/tracks`).
pub fn routes<T: Domain>(segment: &str) -> Router<AppState> {
    Router::new()
        .route(&format!("/{}", segment), get(search::<T>))
        .route(&format!("/{}/genre/:genre", segment), get(by_genre::<T>))
        .route(&format!("/{}/year/:year", segment), get(by_year::<T>))
        .route(&format!("/{}/actor/:actor", segment), get(by_actor::<T>))
        .route(&format!("/{}/creator/:creator", segment), get(by_creator::<T>))
        .route(&format!("/{}/studio/:studio", segment), get(by_studio::<T>))
        .route(&format!("/{}/recent", segment), get(recently_added::<T>))
        .route(&format!("/{}/top-rated", segment), get(top_rated::<T>))
        .route(&format!("/{}/popular", segment), get(popular::<T>))
        .route(&format!("/{}/favorites", segment), get(favorites::<T>))
        .route(&format!("/{}/local", segment), get(search_local::<T>))
        .route(&format!("/{}/local/recent", segment), get(recent_local::<T>))
        .route(&format!("/{}/local/:id", segment), get(get_local::<T>))
        .route(&format!("/clients/:client_id/{}", segment), get(client_items::<T>))
        .route(&format!("/clients/:client_id/{}/:item_id", segment), get(client_item::<T>))
        .route(&format!("/clients/:client_id/{}/:item_id/import", segment), post(import::<T>))
}

/// Season and episode browsing on a single client.
pub fn series_routes() -> Router<AppState> {
    Router::new()
        .route("/clients/:client_id/series/:item_id/seasons", get(seasons))
        .route(
            "/clients/:client_id/series/:item_id/seasons/:season/episodes",
            get(episodes),
        )
}

async fn annotate<T: Domain>(
    service: &MediaService<T>,
    user: &AuthUser,
    params: &SearchParams,
    items: Vec<MediaItem<T>>,
) -> ApiResult<Vec<WithUserData<T>>> {
    if params.wants_user_data() {
        return ok(service.with_user_data(user.user_id, items).await?);
    }
    ok(items
        .into_iter()
        .map(|item| WithUserData { item, user_data: None })
        .collect())
}

async fn search<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.search_across(user.user_id, &params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn by_genre<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(genre): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_by_genre(user.user_id, &genre, params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn by_year<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(year): Path<i32>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_by_year(user.user_id, year, params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn by_actor<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(actor): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_by_actor(user.user_id, &actor, params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn by_creator<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(creator): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_by_creator(user.user_id, &creator, params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn by_studio<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(studio): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_by_studio(user.user_id, &studio, params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn recently_added<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_recently_added(user.user_id, params.limit()?).await?;
    annotate(service, &user, &params, items).await
}

async fn top_rated<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_top_rated(user.user_id, params.limit()?).await?;
    annotate(service, &user, &params, items).await
}

async fn popular<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_popular(user.user_id, params.limit()?).await?;
    annotate(service, &user, &params, items).await
}

async fn favorites<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.get_favorites(user.user_id, params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn search_local<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service.search_local(&params.options()?).await?;
    annotate(service, &user, &params, items).await
}

async fn recent_local<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let days = params.days(DEFAULT_RECENT_DAYS)?;
    let items = service.get_recent_local(days, params.limit()?).await?;
    annotate(service, &user, &params, items).await
}

async fn get_local<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<WithUserData<T>> {
    let service = T::service(&state.services);
    let item = service.get_local(id).await?;
    let annotated = service.with_user_data(user.user_id, vec![item]).await?;
    match annotated.into_iter().next() {
        Some(item) => ok(item),
        None => Err(AppError::NotFound(format!("item {}", id))),
    }
}

async fn client_items<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(client_id): Path<i64>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<WithUserData<T>>> {
    let service = T::service(&state.services);
    let items = service
        .get_client_items(user.user_id, client_id, &params.options()?)
        .await?;
    annotate(service, &user, &params, items).await
}

async fn client_item<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, item_id)): Path<(i64, String)>,
    Query(params): Query<SearchParams>,
) -> ApiResult<WithUserData<T>> {
    let service = T::service(&state.services);
    let item = service.get_by_id(user.user_id, client_id, &item_id).await?;
    let user_data = if params.wants_user_data() {
        service
            .with_user_data(user.user_id, vec![item.clone()])
            .await?
            .into_iter()
            .next()
            .and_then(|w| w.user_data)
    } else {
        None
    };
    ok(WithUserData { item, user_data })
}

async fn import<T: Domain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, item_id)): Path<(i64, String)>,
) -> ApiResult<MediaItem<T>> {
    ok(T::service(&state.services).import(user.user_id, client_id, &item_id).await?)
}

async fn seasons(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, series_id)): Path<(i64, String)>,
) -> ApiResult<Vec<MediaItem<Season>>> {
    let service = <Series as Domain>::service(&state.services);
    ok(service.get_seasons(user.user_id, client_id, &series_id).await?)
}

async fn episodes(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, series_id, season)): Path<(i64, String, i32)>,
) -> ApiResult<Vec<MediaItem<Episode>>> {
    let service = <Series as Domain>::service(&state.services);
    ok(service.get_episodes(user.user_id, client_id, &series_id, season).await?)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::api::test_support::TestApp;

    async fn add_client(app: &TestApp, token: &str, name: &str, kind: &str) -> i64 {
        let (status, body) = app
            .call(
                "POST",
                "/api/v1/clients",
                Some(token),
                Some(json!({
                    "name": name,
                    "type": kind,
                    "settings": {"baseUrl": "http://fake", "token": "t", "apiKey": "k", "userId": "u", "username": "u", "password": "p"}
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["data"]["id"].as_i64().unwrap()
    }

    fn titles(body: &Value) -> Vec<String> {
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["data"]["details"]["title"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_search_merges_clients_and_skips_failures() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        add_client(&app, &token, "plex", "plex").await;
        add_client(&app, &token, "jf", "jellyfin").await;
        add_client(&app, &token, "sub", "subsonic").await;
        app.registry.state("plex").add_movie("m1", "Heat", Some(8.3));
        app.registry.state("jf").add_movie("j1", "Ronin", Some(7.2));
        app.registry.state("jf").add_movie("j2", "Thief", Some(7.4));

        let subsonic_calls = app.registry.state("sub").calls();
        let (status, body) = app.call("GET", "/api/v1/movies?sort=rating", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(titles(&body), vec!["Heat", "Thief", "Ronin"]);
        // subsonic cannot serve movies and is never asked
        assert_eq!(app.registry.state("sub").calls(), subsonic_calls);

        app.registry.state("jf").set_failing(true);
        let (status, body) = app.call("GET", "/api/v1/movies?sort=rating&limit=5", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(titles(&body), vec!["Heat"]);
    }

    #[tokio::test]
    async fn test_import_and_local_lookup() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        let plex = add_client(&app, &token, "plex", "plex").await;
        app.registry.state("plex").add_movie("m1", "Heat", Some(8.3));

        let uri = format!("/api/v1/clients/{}/movies/m1/import", plex);
        let (status, body) = app.call("POST", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let id = body["data"]["id"].as_i64().unwrap();
        assert!(id > 0);

        let (_, again) = app.call("POST", &uri, Some(&token), None).await;
        assert_eq!(again["data"]["id"].as_i64(), Some(id));

        let (status, body) = app
            .call("GET", &format!("/api/v1/movies/local/{}", id), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["data"]["details"]["title"], "Heat");

        let (status, _) = app.call("GET", "/api/v1/movies/local/9999", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unsupported_client_is_bad_request() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        let sub = add_client(&app, &token, "sub", "subsonic").await;
        let (status, body) = app
            .call("GET", &format!("/api/v1/clients/{}/movies", sub), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
