use axum::{extract::Request, http::Method, response::IntoResponse, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::db::SqliteRepository;
use crate::error::AppError;
use crate::service::Services;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<SqliteRepository>,
    pub services: Arc<Services>,
}

impl AppState {
    pub fn new(config: Config, db: Arc<SqliteRepository>, services: Arc<Services>) -> Self {
        Self {
            config: Arc::new(config),
            db,
            services,
        }
    }
}

/// The full service: path normalization in front of [`build_router`]. The inner
/// router sits behind a fallback so the rewritten path is what gets routed.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .fallback_service(build_router(state))
        .layer(axum::middleware::from_fn(crate::middleware::normalize_path))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/robots.txt", get(robots_txt_handler))
        .route("/health", get(health_handler))
        .nest("/api/v1", crate::api::routes(state.clone()))
        .fallback(fallback_handler)
        .layer(axum::middleware::from_fn(crate::middleware::log_request))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn robots_txt_handler() -> &'static str {
    "User-agent: *\nDisallow: /\n"
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn fallback_handler(req: Request) -> impl IntoResponse {
    if req.method() == Method::OPTIONS {
        return axum::http::StatusCode::OK.into_response();
    }
    AppError::NotFound(format!("no route for {} {}", req.method(), req.uri().path())).into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::api::test_support::TestApp;

    #[tokio::test]
    async fn test_unknown_route_gets_envelope() {
        let app = TestApp::new().await;
        let (status, body) = app.call("GET", "/api/v2/nothing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = app.call("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_paths_are_normalized_before_routing() {
        let app = TestApp::new().await;
        let (status, _) = app.call("GET", "//health/", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.call("GET", "/api/v1//auth/me/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);
    }
}
