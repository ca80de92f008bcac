use std::time::Instant;

use axum::{
    extract::Request,
    http::uri::Uri,
    middleware::Next,
    response::Response,
};
use tracing::info;

/// Collapses repeated slashes and drops a trailing slash, so `/api/v1//movies/`
/// routes like `/api/v1/movies`. Only effective in front of routing; see
/// [`crate::server::build_app`].
pub async fn normalize_path(mut req: Request, next: Next) -> Response {
    let uri = req.uri();
    if let Some(normalized) = normalized_path(uri.path()) {
        let mut parts = uri.clone().into_parts();
        let new_path_and_query = match uri.query() {
            Some(query) => format!("{}?{}", normalized, query),
            None => normalized,
        };

        if let Ok(new_uri) = new_path_and_query.parse::<Uri>() {
            parts.path_and_query = new_uri.into_parts().path_and_query;
            if let Ok(new_uri) = Uri::from_parts(parts) {
                *req.uri_mut() = new_uri;
            }
        }
    }

    next.run(req).await
}

fn normalized_path(path: &str) -> Option<String> {
    let mut normalized = path.to_string();
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    (normalized != path).then_some(normalized)
}

pub async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let content_length = response
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    info!(
        method = %method,
        url = %uri,
        status = status,
        length = content_length,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "HTTP request"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_path() {
        assert_eq!(normalized_path("/api/v1/movies"), None);
        assert_eq!(normalized_path("/"), None);
        assert_eq!(normalized_path("/api//v1///movies"), Some("/api/v1/movies".to_string()));
        assert_eq!(normalized_path("/api/v1/movies/"), Some("/api/v1/movies".to_string()));
    }
}
