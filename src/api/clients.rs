use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::client::{Capabilities, ClientCategory, ClientConfig};
use crate::error::AppError;
use crate::server::AppState;
use crate::service::{CreateClientRequest, UpdateClientRequest};

use super::{ok, ok_message, ApiResult, AuthUser};

const REDACTED: &str = "********";

/// A client configuration as returned to callers: secrets masked,
/// effective capabilities spelled out.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    #[serde(flatten)]
    pub config: ClientConfig,
    pub capabilities: Capabilities,
}

impl From<ClientConfig> for ClientView {
    fn from(mut config: ClientConfig) -> Self {
        let capabilities = config.capabilities();
        for secret in [
            &mut config.settings.api_key,
            &mut config.settings.token,
            &mut config.settings.password,
        ] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        ClientView { config, capabilities }
    }
}

fn views(configs: Vec<ClientConfig>) -> Vec<ClientView> {
    configs.into_iter().map(ClientView::from).collect()
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/clients", get(list_clients).post(create_client))
        .route("/clients/category/:category", get(list_by_category))
        .route(
            "/clients/:client_id",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/clients/:client_id/test", post(test_client))
}

async fn list_clients(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<ClientView>> {
    ok(views(state.services.clients.list(user.user_id).await?))
}

async fn list_by_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(category): Path<String>,
) -> ApiResult<Vec<ClientView>> {
    let category = ClientCategory::from_str(&category)
        .ok_or_else(|| AppError::InvalidArgument(format!("unknown client category {}", category)))?;
    ok(views(state.services.clients.list_by_category(user.user_id, category).await?))
}

async fn create_client(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateClientRequest>,
) -> ApiResult<ClientView> {
    ok(state.services.clients.create(user.user_id, req).await?.into())
}

async fn get_client(State(state): State<AppState>, user: AuthUser, Path(client_id): Path<i64>) -> ApiResult<ClientView> {
    ok(state.services.clients.get(user.user_id, client_id).await?.into())
}

async fn update_client(
    State(state): State<AppState>,
    user: AuthUser,
    Path(client_id): Path<i64>,
    Json(req): Json<UpdateClientRequest>,
) -> ApiResult<ClientView> {
    ok(state.services.clients.update(user.user_id, client_id, req).await?.into())
}

async fn delete_client(State(state): State<AppState>, user: AuthUser, Path(client_id): Path<i64>) -> ApiResult<()> {
    state.services.clients.delete(user.user_id, client_id).await?;
    ok_message("client deleted")
}

async fn test_client(State(state): State<AppState>, user: AuthUser, Path(client_id): Path<i64>) -> ApiResult<()> {
    state.services.clients.test(user.user_id, client_id).await?;
    ok_message("connection ok")
}
