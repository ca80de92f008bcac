use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::client::WatchHistoryEntry;
use crate::db::UserMediaItemData;
use crate::server::AppState;
use crate::service::PlayEvent;

use super::params::HistoryParams;
use super::{ok, ok_message, ApiResult, AuthUser};

const DEFAULT_HISTORY_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub favorite: bool,
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub rating: f32,
}

#[derive(Debug, Serialize)]
pub struct ClearedHistory {
    pub cleared: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/userdata/play", post(record_play))
        .route("/userdata/items/:item_id", get(get_for_item))
        .route("/userdata/items/:item_id/favorite", put(toggle_favorite))
        .route("/userdata/items/:item_id/rating", put(update_rating))
        .route("/userdata/continue-watching", get(continue_watching))
        .route("/userdata/history", get(history).delete(clear_history))
        .route("/userdata/history/recent", get(recent_history))
        .route("/userdata/history/clients", get(client_history))
        .route("/userdata/favorites", get(favorites))
        .route("/userdata/:id", get(get_by_id).delete(delete_by_id))
}

async fn record_play(
    State(state): State<AppState>,
    user: AuthUser,
    Json(event): Json<PlayEvent>,
) -> ApiResult<UserMediaItemData> {
    ok(state.services.user_data.record_play(user.user_id, event).await?)
}

async fn get_for_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<i64>,
) -> ApiResult<UserMediaItemData> {
    ok(state.services.user_data.get(user.user_id, item_id).await?)
}

async fn toggle_favorite(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<i64>,
    Json(req): Json<FavoriteRequest>,
) -> ApiResult<UserMediaItemData> {
    ok(state
        .services
        .user_data
        .toggle_favorite(item_id, user.user_id, req.favorite)
        .await?)
}

async fn update_rating(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<i64>,
    Json(req): Json<RatingRequest>,
) -> ApiResult<UserMediaItemData> {
    ok(state
        .services
        .user_data
        .update_rating(item_id, user.user_id, req.rating)
        .await?)
}

async fn continue_watching(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<UserMediaItemData>> {
    let limit = params.limit()?;
    ok(state.services.user_data.get_continue_watching(user.user_id, limit).await?)
}

async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<UserMediaItemData>> {
    let media_type = params.media_type()?;
    let limit = params.limit()?;
    let offset = params.offset()?;
    ok(state
        .services
        .user_data
        .get_user_history(user.user_id, media_type, limit, offset)
        .await?)
}

async fn recent_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<UserMediaItemData>> {
    let days = params.days(DEFAULT_HISTORY_DAYS)?;
    ok(state.services.user_data.get_recent_history(user.user_id, days).await?)
}

async fn client_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<WatchHistoryEntry>> {
    let media_type = params.media_type()?;
    let limit = params.limit()?;
    ok(state
        .services
        .user_data
        .get_client_history(user.user_id, media_type, limit)
        .await?)
}

async fn clear_history(State(state): State<AppState>, user: AuthUser) -> ApiResult<ClearedHistory> {
    let cleared = state.services.user_data.clear_user_history(user.user_id).await?;
    ok(ClearedHistory { cleared })
}

async fn favorites(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<UserMediaItemData>> {
    let media_type = params.media_type()?;
    ok(state.services.user_data.get_favorites(user.user_id, media_type).await?)
}

async fn get_by_id(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<UserMediaItemData> {
    ok(state.services.user_data.get_by_id(user.user_id, id).await?)
}

async fn delete_by_id(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<()> {
    state.services.user_data.delete(user.user_id, id).await?;
    ok_message("user data deleted")
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::TestApp;

    async fn imported_movie(app: &TestApp, token: &str) -> i64 {
        let (_, body) = app
            .call(
                "POST",
                "/api/v1/clients",
                Some(token),
                Some(json!({"name": "plex", "type": "plex", "settings": {"baseUrl": "http://plex", "token": "t"}})),
            )
            .await;
        let client = body["data"]["id"].as_i64().unwrap();
        app.registry.state("plex").add_movie("m1", "Heat", Some(8.3));
        let (_, body) = app
            .call("POST", &format!("/api/v1/clients/{}/movies/m1/import", client), Some(token), None)
            .await;
        body["data"]["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_rating_and_favorites_over_http() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        let movie = imported_movie(&app, &token).await;
        let item = format!("/api/v1/userdata/items/{}", movie);

        let (status, _) = app
            .call("PUT", &format!("{}/rating", item), Some(&token), Some(json!({"rating": 6})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = app
            .call("PUT", &format!("{}/rating", item), Some(&token), Some(json!({"rating": 3.5})))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        let (status, _) = app
            .call("PUT", &format!("{}/favorite", item), Some(&token), Some(json!({"favorite": true})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.call("GET", "/api/v1/userdata/favorites?type=movie", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        // the overlay shows up on annotated lookups
        let (_, body) = app
            .call("GET", &format!("/api/v1/movies/local/{}", movie), Some(&token), None)
            .await;
        assert_eq!(body["data"]["userData"]["rating"], 3.5);

        let (status, _) = app.call("GET", "/api/v1/userdata/favorites?type=podcast", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_play_history_over_http() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        let other = app.login("bob").await;
        let movie = imported_movie(&app, &token).await;

        let (status, body) = app
            .call(
                "POST",
                "/api/v1/userdata/play",
                Some(&token),
                Some(json!({"mediaItemId": movie, "positionSeconds": 60, "durationSeconds": 6000})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let record = body["data"]["id"].as_i64().unwrap();

        let (_, body) = app.call("GET", "/api/v1/userdata/continue-watching", Some(&token), None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = app
            .call("GET", &format!("/api/v1/userdata/{}", record), Some(&other), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.call("DELETE", "/api/v1/userdata/history", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["cleared"], 1);
    }

    #[tokio::test]
    async fn test_client_history_over_http() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        imported_movie(&app, &token).await;
        let played = chrono::Utc::now();
        app.registry
            .state("plex")
            .add_history("m1", "Heat", crate::media::MediaType::Movie, played);

        let (status, body) = app
            .call("GET", "/api/v1/userdata/history/clients?type=movie", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["data"][0]["title"], "Heat");
        assert_eq!(body["data"][0]["itemId"], "m1");

        let (status, _) = app
            .call("GET", "/api/v1/userdata/history/clients?limit=100000", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
