use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::media::{ListItem, MediaItem};
use crate::server::AppState;
use crate::service::ListDomain;

use super::params::SearchParams;
use super::{ok, ok_message, ApiResult, AuthUser};

#[derive(Debug, Deserialize)]
pub struct ClientListRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientItemRequest {
    pub item_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientReorderRequest {
    pub item_ids: Vec<String>,
}

/// Lists living on a single client, addressed by the client's own ids.
pub fn routes<T: ListDomain>(segment: &str) -> Router<AppState> {
    Router::new()
        .route(&format!("/{}/remote", segment), get(search_across::<T>))
        .route(
            &format!("/clients/:client_id/{}", segment),
            get(get_lists::<T>).post(create::<T>),
        )
        .route(
            &format!("/clients/:client_id/{}/:list_id", segment),
            get(get_list::<T>).put(update::<T>).delete(delete_list::<T>),
        )
        .route(
            &format!("/clients/:client_id/{}/:list_id/items", segment),
            get(items::<T>).post(add_item::<T>),
        )
        .route(
            &format!("/clients/:client_id/{}/:list_id/items/:item_id", segment),
            delete(remove_item::<T>),
        )
        .route(
            &format!("/clients/:client_id/{}/:list_id/reorder", segment),
            put(reorder::<T>),
        )
}

async fn search_across<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<MediaItem<T>>> {
    ok(T::client_lists(&state.services)
        .search_across(user.user_id, &params.options()?)
        .await?)
}

async fn get_lists<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(client_id): Path<i64>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<MediaItem<T>>> {
    ok(T::client_lists(&state.services)
        .get_lists(user.user_id, client_id, &params.options()?)
        .await?)
}

async fn create<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(client_id): Path<i64>,
    Json(req): Json<ClientListRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::client_lists(&state.services)
        .create(user.user_id, client_id, &req.name, &req.description)
        .await?)
}

async fn get_list<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, list_id)): Path<(i64, String)>,
) -> ApiResult<MediaItem<T>> {
    ok(T::client_lists(&state.services)
        .get_list(user.user_id, client_id, &list_id)
        .await?)
}

async fn update<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, list_id)): Path<(i64, String)>,
    Json(req): Json<ClientListRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::client_lists(&state.services)
        .update(user.user_id, client_id, &list_id, &req.name, &req.description)
        .await?)
}

async fn delete_list<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, list_id)): Path<(i64, String)>,
) -> ApiResult<()> {
    T::client_lists(&state.services)
        .delete(user.user_id, client_id, &list_id)
        .await?;
    ok_message("list deleted")
}

async fn items<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, list_id)): Path<(i64, String)>,
) -> ApiResult<Vec<ListItem>> {
    ok(T::client_lists(&state.services)
        .get_list_items(user.user_id, client_id, &list_id)
        .await?)
}

async fn add_item<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, list_id)): Path<(i64, String)>,
    Json(req): Json<ClientItemRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::client_lists(&state.services)
        .add_item(user.user_id, client_id, &list_id, &req.item_id)
        .await?)
}

async fn remove_item<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, list_id, item_id)): Path<(i64, String, String)>,
) -> ApiResult<MediaItem<T>> {
    ok(T::client_lists(&state.services)
        .remove_item(user.user_id, client_id, &list_id, &item_id)
        .await?)
}

async fn reorder<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((client_id, list_id)): Path<(i64, String)>,
    Json(req): Json<ClientReorderRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::client_lists(&state.services)
        .reorder(user.user_id, client_id, &list_id, &req.item_ids)
        .await?)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::TestApp;

    #[tokio::test]
    async fn test_client_playlist_over_http() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        let (_, body) = app
            .call(
                "POST",
                "/api/v1/clients",
                Some(&token),
                Some(json!({"name": "plex", "type": "plex", "settings": {"baseUrl": "http://plex", "token": "t"}})),
            )
            .await;
        let client = body["data"]["id"].as_i64().unwrap();
        app.registry.state("plex").add_playlist("p1", "Mix", &["a", "b"]);

        let base = format!("/api/v1/clients/{}/playlists/p1", client);
        let (status, body) = app
            .call("POST", &format!("{}/items", base), Some(&token), Some(json!({"itemId": "c"})))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(app.registry.state("plex").playlist_items("p1"), vec!["a", "b", "c"]);

        let (status, _) = app
            .call(
                "PUT",
                &format!("{}/reorder", base),
                Some(&token),
                Some(json!({"itemIds": ["c", "b", "a"]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.call("GET", &format!("{}/items", base), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["itemId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let (status, body) = app.call("GET", "/api/v1/playlists/remote?q=mix", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }
}
