pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod middleware;
pub mod server;
pub mod service;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{ClientFactory, ClientSettings, ClientType};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] db::DbError),
    #[error("Provider error: {0}")]
    Provider(#[from] client::ProviderError),
    #[error("Startup error: {0}")]
    Startup(#[from] error::AppError),
    #[error("Server error: {0}")]
    Server(String),
}

pub async fn run(config_path: &str, debug_logs: bool) -> Result<(), ServerError> {
    let mut config = config::Config::from_file(config_path)?;
    config.debug_logs = debug_logs;

    info!("Using config file: {}", config_path);
    if debug_logs {
        info!("Debug logging enabled");
    }

    let db_path = config
        .get_database_path()
        .ok_or_else(|| ServerError::Server("No database path configured".to_string()))?;

    info!("Opening database at {}", db_path);
    let db = Arc::new(db::SqliteRepository::new(&db_path).await?);
    db.clone().start_background_tasks();

    let factory = Arc::new(ClientFactory::from_config(&config.providers)?);
    let shutdown = CancellationToken::new();
    let services = Arc::new(service::Services::new(
        db.clone(),
        factory,
        &config.aggregation,
        shutdown.clone(),
    ));

    if let Some(ref tmdb) = config.metadata.tmdb {
        let name = tmdb.name.as_deref().unwrap_or("TMDB");
        let settings = ClientSettings {
            api_key: Some(tmdb.api_key.clone()),
            ..Default::default()
        };
        let client = services
            .clients
            .ensure_system_client(name, ClientType::Tmdb, settings)
            .await?;
        info!(id = client.id, "metadata provider {} available to all users", name);
    }

    let address = config.listen.address.as_deref().unwrap_or("[::]");
    let port = &config.listen.port;
    let addr: SocketAddr = format!("{}:{}", address, port)
        .parse()
        .map_err(|e| ServerError::Server(format!("Invalid address: {}", e)))?;

    let tls_paths = match (&config.listen.tlscert, &config.listen.tlskey) {
        (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
        (None, None) => None,
        _ => {
            warn!("Both tlscert and tlskey are needed for TLS; serving plain HTTP");
            None
        }
    };

    let state = server::AppState::new(config, db, services);
    let app = server::build_app(state);

    tokio::spawn(cancel_on_signal(shutdown.clone()));

    if let Some((cert_path, key_path)) = tls_paths {
        info!("Loading TLS certificate from {}", cert_path);
        info!("Loading TLS key from {}", key_path);

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert_path, &key_path)
            .await
            .map_err(|e| ServerError::Server(format!("Failed to load TLS config: {}", e)))?;

        let handle = axum_server::Handle::new();
        let token = shutdown.clone();
        let server_handle = handle.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            server_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        info!("Serving HTTPS on {}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(|e| ServerError::Server(format!("Server error: {}", e)))?;
    } else {
        info!("Serving HTTP on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Server(format!("Failed to bind: {}", e)))?;

        let token = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| ServerError::Server(format!("Server error: {}", e)))?;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Cancels `token` on Ctrl+C or SIGTERM, which stops in-flight fan-outs and
/// the listener.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
