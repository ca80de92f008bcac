use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::media::{ListCollaborator, MediaItem, MediaItemList, Permission};
use crate::server::AppState;
use crate::service::{ListDomain, ListUpdate, SyncOutcome};

use super::params::SearchParams;
use super::{ok, ok_message, ApiResult, AuthUser};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub item_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub item_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub position: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub user_id: i64,
    pub permission: Permission,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub client_ids: Vec<i64>,
}

/// Locally stored lists of one kind, mounted under `segment`.
pub fn routes<T: ListDomain>(segment: &str) -> Router<AppState> {
    Router::new()
        .route(&format!("/{}", segment), get(user_lists::<T>).post(create::<T>))
        .route(&format!("/{}/search", segment), get(search::<T>))
        .route(
            &format!("/{}/:id", segment),
            get(get_list::<T>).put(update::<T>).delete(delete_list::<T>),
        )
        .route(&format!("/{}/:id/items", segment), get(items::<T>).post(add_item::<T>))
        .route(&format!("/{}/:id/items/:item_id", segment), delete(remove_item::<T>))
        .route(&format!("/{}/:id/items/:item_id/position", segment), put(move_item::<T>))
        .route(&format!("/{}/:id/reorder", segment), put(reorder::<T>))
        .route(&format!("/{}/:id/collaborators", segment), get(collaborators::<T>))
        .route(&format!("/{}/:id/share", segment), post(share::<T>))
        .route(&format!("/{}/:id/share/:user_id", segment), delete(unshare::<T>))
        .route(&format!("/{}/:id/sync", segment), post(sync::<T>))
}

async fn user_lists<T: ListDomain>(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<MediaItem<T>>> {
    ok(T::lists(&state.services).get_user_lists(user.user_id).await?)
}

async fn create<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateListRequest>,
) -> ApiResult<MediaItem<T>> {
    let list = T::lists(&state.services)
        .create(user.user_id, &req.name, &req.description, req.is_public)
        .await?;
    ok(list)
}

async fn search<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<MediaItem<T>>> {
    ok(T::lists(&state.services).search(user.user_id, &params.options()?).await?)
}

async fn get_list<T: ListDomain>(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services).get(user.user_id, id).await?)
}

async fn update<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ListUpdate>,
) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services).update(user.user_id, id, req).await?)
}

async fn delete_list<T: ListDomain>(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<()> {
    T::lists(&state.services).delete(user.user_id, id).await?;
    ok_message("list deleted")
}

async fn items<T: ListDomain>(State(state): State<AppState>, user: AuthUser, Path(id): Path<i64>) -> ApiResult<MediaItemList> {
    ok(T::lists(&state.services).get_items(user.user_id, id).await?)
}

async fn add_item<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AddItemRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services).add_item(user.user_id, id, req.item_id).await?)
}

async fn remove_item<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(i64, i64)>,
) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services).remove_item(user.user_id, id, item_id).await?)
}

async fn move_item<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(i64, i64)>,
    Json(req): Json<MoveRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services)
        .move_item(user.user_id, id, item_id, req.position)
        .await?)
}

async fn reorder<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ReorderRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services).reorder(user.user_id, id, &req.item_ids).await?)
}

async fn collaborators<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Vec<ListCollaborator>> {
    ok(T::lists(&state.services).collaborators(user.user_id, id).await?)
}

async fn share<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ShareRequest>,
) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services)
        .share(user.user_id, id, req.user_id, req.permission)
        .await?)
}

async fn unshare<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, with_user)): Path<(i64, i64)>,
) -> ApiResult<MediaItem<T>> {
    ok(T::lists(&state.services).unshare(user.user_id, id, with_user).await?)
}

async fn sync<T: ListDomain>(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<SyncRequest>,
) -> ApiResult<Vec<SyncOutcome>> {
    ok(T::lists(&state.services).sync(user.user_id, id, &req.client_ids).await?)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::api::test_support::TestApp;

    async fn import_movies(app: &TestApp, token: &str, ids: &[&str]) -> Vec<i64> {
        let (status, body) = app
            .call(
                "POST",
                "/api/v1/clients",
                Some(token),
                Some(json!({"name": "plex", "type": "plex", "settings": {"baseUrl": "http://plex", "token": "t"}})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let client = body["data"]["id"].as_i64().unwrap();

        let mut out = Vec::new();
        for id in ids {
            app.registry.state("plex").add_movie(id, id, None);
            let uri = format!("/api/v1/clients/{}/movies/{}/import", client, id);
            let (status, body) = app.call("POST", &uri, Some(token), None).await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            out.push(body["data"]["id"].as_i64().unwrap());
        }
        out
    }

    fn order(body: &Value) -> Vec<i64> {
        body["data"]["order"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_playlist_editing_over_http() {
        let app = TestApp::new().await;
        let token = app.login("alice").await;
        let movies = import_movies(&app, &token, &["a", "b", "c"]).await;

        let (status, body) = app
            .call("POST", "/api/v1/playlists", Some(&token), Some(json!({"name": "Weekend"})))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let id = body["data"]["id"].as_i64().unwrap();

        for movie in &movies {
            let (status, _) = app
                .call(
                    "POST",
                    &format!("/api/v1/playlists/{}/items", id),
                    Some(&token),
                    Some(json!({"itemId": movie})),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        let reversed: Vec<i64> = movies.iter().rev().copied().collect();
        let (status, _) = app
            .call(
                "PUT",
                &format!("/api/v1/playlists/{}/reorder", id),
                Some(&token),
                Some(json!({"itemIds": reversed})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .call("GET", &format!("/api/v1/playlists/{}/items", id), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order(&body), reversed);
        assert_eq!(body["data"]["movies"].as_array().unwrap().len(), 3);

        // a partial ordering is rejected
        let (status, _) = app
            .call(
                "PUT",
                &format!("/api/v1/playlists/{}/reorder", id),
                Some(&token),
                Some(json!({"itemIds": [movies[0]]})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // a stale version is a conflict
        let (status, _) = app
            .call(
                "PUT",
                &format!("/api/v1/playlists/{}", id),
                Some(&token),
                Some(json!({"name": "Renamed", "version": 0})),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_sharing_over_http() {
        let app = TestApp::new().await;
        let alice = app.login("alice").await;
        let bob = app.login("bob").await;
        let (_, me) = app.call("GET", "/api/v1/auth/me", Some(&bob), None).await;
        let bob_id = me["data"]["id"].as_i64().unwrap();

        let (_, body) = app
            .call("POST", "/api/v1/collections", Some(&alice), Some(json!({"name": "Noir"})))
            .await;
        let id = body["data"]["id"].as_i64().unwrap();
        let uri = format!("/api/v1/collections/{}", id);

        let (status, _) = app.call("GET", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call(
                "POST",
                &format!("{}/share", uri),
                Some(&alice),
                Some(json!({"userId": bob_id, "permission": "read"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app.call("GET", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .call("PUT", &uri, Some(&bob), Some(json!({"name": "Mine now"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.call("DELETE", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .call("GET", &format!("{}/collaborators", uri), Some(&alice), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["userId"].as_i64(), Some(bob_id));

        let (status, _) = app.call("DELETE", &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
