pub mod auth;
pub mod client_lists;
pub mod clients;
pub mod lists;
pub mod media;
pub mod params;
pub mod userdata;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::error;

use crate::error::AppError;
use crate::media::{Album, Artist, Collection, Movie, Playlist, Series, Track};
use crate::server::AppState;

pub use auth::AuthUser;

/// The JSON envelope every endpoint answers with.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        message: String::new(),
        data: Some(data),
    }))
}

pub fn ok_message(message: impl Into<String>) -> ApiResult<()> {
    Ok(Json(ApiResponse {
        success: true,
        message: message.into(),
        data: None,
    }))
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::UnsupportedFeature(_) | AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Provider(_) | AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ApiResponse::<()> {
            success: false,
            message: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Routes under `/api/v1`. Everything except login requires a token.
pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .merge(clients::routes())
        .merge(media::routes::<Movie>("movies"))
        .merge(media::routes::<Series>("series"))
        .merge(media::series_routes())
        .merge(media::routes::<Track>("music/tracks"))
        .merge(media::routes::<Album>("music/albums"))
        .merge(media::routes::<Artist>("music/artists"))
        .merge(lists::routes::<Playlist>("playlists"))
        .merge(lists::routes::<Collection>("collections"))
        .merge(client_lists::routes::<Playlist>("playlists"))
        .merge(client_lists::routes::<Collection>("collections"))
        .merge(userdata::routes())
        .route_layer(axum::middleware::from_fn_with_state(state, auth::require_auth));

    Router::new()
        .route("/auth/login", post(auth::login))
        .merge(protected)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    use crate::client::testing::FakeRegistry;
    use crate::client::ClientFactory;
    use crate::config::Config;
    use crate::db::SqliteRepository;
    use crate::server::{build_app, AppState};
    use crate::service::Services;

    pub struct TestApp {
        pub router: Router,
        pub registry: FakeRegistry,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let mut config = Config::from_yaml("auth:\n  autoregister: true\n  password_cost: 4\n").unwrap();
            config.aggregation.call_timeout = 2;
            config.aggregation.deadline = 2;
            let db = Arc::new(SqliteRepository::in_memory().await.unwrap());
            let factory = Arc::new(ClientFactory::empty(reqwest::Client::new()));
            let registry = FakeRegistry::default();
            registry.install(&factory);
            let services = Services::new(db.clone(), factory, &config.aggregation, CancellationToken::new());
            let state = AppState::new(config, db, Arc::new(services));
            TestApp {
                router: build_app(state),
                registry,
            }
        }

        pub async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            };
            (status, value)
        }

        /// Logs in (auto-registering) and returns the token.
        pub async fn login(&self, username: &str) -> String {
            let (status, body) = self
                .call(
                    "POST",
                    "/api/v1/auth/login",
                    None,
                    Some(serde_json::json!({"username": username, "password": "secret"})),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{}", body);
            body["data"]["token"].as_str().unwrap().to_string()
        }
    }
}
