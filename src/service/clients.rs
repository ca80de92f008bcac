use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::client::{ClientCategory, ClientConfig, ClientResolver, ClientSettings, ClientType, SYSTEM_USER};
use crate::db::ClientRepo;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub client_type: ClientType,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub settings: ClientSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub settings: Option<ClientSettings>,
}

/// Lifecycle of client configurations: validated, connection-tested, then
/// stored.
pub struct ClientService {
    repo: Arc<dyn ClientRepo>,
    resolver: Arc<ClientResolver>,
}

impl ClientService {
    pub fn new(repo: Arc<dyn ClientRepo>, resolver: Arc<ClientResolver>) -> Self {
        Self { repo, resolver }
    }

    /// Builds an adapter for an unsaved configuration and checks that the
    /// vendor answers.
    async fn check(&self, config: &ClientConfig) -> AppResult<()> {
        config.validate().map_err(AppError::InvalidArgument)?;
        if !config.enabled {
            return Ok(());
        }
        let provider = self.resolver.factory().build(config)?;
        if let Err(e) = provider.test_connection().await {
            warn!(name = %config.name, kind = %config.client_type, error = %e, "connection test failed");
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn create(&self, user_id: i64, request: CreateClientRequest) -> AppResult<ClientConfig> {
        let mut config = ClientConfig::new(user_id, request.name.trim(), request.client_type, request.settings);
        config.enabled = request.enabled.unwrap_or(true);
        self.check(&config).await?;
        let created = self.repo.create(&config).await?;
        info!(id = created.id, user = user_id, kind = %created.client_type, "added client");
        Ok(created)
    }

    /// Seeds or refreshes a system-owned client, e.g. the metadata provider
    /// configured in the server config. No connection test is done.
    pub async fn ensure_system_client(&self, name: &str, client_type: ClientType, settings: ClientSettings) -> AppResult<ClientConfig> {
        let existing = self
            .repo
            .get_by_category(SYSTEM_USER, client_type.category())
            .await?
            .into_iter()
            .find(|c| c.user_id == SYSTEM_USER && c.client_type == client_type);

        match existing {
            Some(config) if config.settings == settings && config.name == name => Ok(config),
            Some(mut config) => {
                config.name = name.to_string();
                config.settings = settings;
                config.validate().map_err(AppError::InvalidArgument)?;
                let updated = self.repo.update(&config).await?;
                self.resolver.invalidate(updated.id);
                info!(id = updated.id, kind = %client_type, "updated system client");
                Ok(updated)
            }
            None => {
                let config = ClientConfig::new(SYSTEM_USER, name, client_type, settings);
                config.validate().map_err(AppError::InvalidArgument)?;
                let created = self.repo.create(&config).await?;
                info!(id = created.id, kind = %client_type, "added system client");
                Ok(created)
            }
        }
    }

    async fn get_owned(&self, user_id: i64, client_id: i64) -> AppResult<ClientConfig> {
        let config = self.resolver.config(user_id, client_id).await?;
        if config.user_id != user_id {
            return Err(AppError::PermissionDenied(format!("client {} is managed by the system", client_id)));
        }
        Ok(config)
    }

    pub async fn update(&self, user_id: i64, client_id: i64, request: UpdateClientRequest) -> AppResult<ClientConfig> {
        let mut config = self.get_owned(user_id, client_id).await?;
        if let Some(name) = request.name {
            config.name = name.trim().to_string();
        }
        if let Some(enabled) = request.enabled {
            config.enabled = enabled;
        }
        if let Some(settings) = request.settings {
            config.settings = settings;
        }
        self.check(&config).await?;
        let updated = self.repo.update(&config).await?;
        self.resolver.invalidate(client_id);
        info!(id = client_id, user = user_id, "updated client");
        Ok(updated)
    }

    pub async fn delete(&self, user_id: i64, client_id: i64) -> AppResult<()> {
        self.get_owned(user_id, client_id).await?;
        self.repo.delete(client_id).await?;
        self.resolver.invalidate(client_id);
        info!(id = client_id, user = user_id, "deleted client");
        Ok(())
    }

    pub async fn list(&self, user_id: i64) -> AppResult<Vec<ClientConfig>> {
        Ok(self.repo.get_by_user_id(user_id).await?)
    }

    pub async fn list_by_category(&self, user_id: i64, category: ClientCategory) -> AppResult<Vec<ClientConfig>> {
        Ok(self.repo.get_by_category(user_id, category).await?)
    }

    pub async fn get(&self, user_id: i64, client_id: i64) -> AppResult<ClientConfig> {
        self.resolver.config(user_id, client_id).await
    }

    /// Tests the stored configuration against the live vendor.
    pub async fn test(&self, user_id: i64, client_id: i64) -> AppResult<()> {
        let provider = self.resolver.resolve(user_id, client_id, None).await?;
        Ok(provider.test_connection().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::FakeRegistry;
    use crate::client::ClientFactory;
    use crate::db::SqliteRepository;

    async fn setup() -> (FakeRegistry, ClientService) {
        let repo = Arc::new(SqliteRepository::in_memory().await.unwrap());
        let factory = Arc::new(ClientFactory::empty(reqwest::Client::new()));
        let registry = FakeRegistry::default();
        registry.install(&factory);
        let resolver = Arc::new(ClientResolver::new(repo.clone(), factory));
        (registry, ClientService::new(repo, resolver))
    }

    fn plex(name: &str) -> CreateClientRequest {
        CreateClientRequest {
            name: name.to_string(),
            client_type: ClientType::Plex,
            enabled: None,
            settings: ClientSettings {
                base_url: "http://plex:32400".to_string(),
                token: Some("tok".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_create_validates_and_tests() {
        let (registry, svc) = setup().await;

        let mut bad = plex("plex");
        bad.settings.token = None;
        assert!(matches!(svc.create(1, bad).await, Err(AppError::InvalidArgument(_))));

        registry.state("down").set_failing(true);
        assert!(matches!(svc.create(1, plex("down")).await, Err(AppError::Provider(_))));
        assert!(svc.list(1).await.unwrap().is_empty());

        let created = svc.create(1, plex("plex")).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(svc.list_by_category(1, ClientCategory::Media).await.unwrap().len(), 1);
        svc.test(1, created.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_and_delete_are_owner_only() {
        let (_registry, svc) = setup().await;
        let created = svc.create(1, plex("plex")).await.unwrap();

        let rename = UpdateClientRequest {
            name: Some("living room".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            svc.update(2, created.id, rename.clone()).await,
            Err(AppError::PermissionDenied(_))
        ));
        let updated = svc.update(1, created.id, rename).await.unwrap();
        assert_eq!(updated.name, "living room");

        assert!(matches!(svc.delete(2, created.id).await, Err(AppError::PermissionDenied(_))));
        svc.delete(1, created.id).await.unwrap();
        assert!(matches!(svc.get(1, created.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_system_client_seeding() {
        let (_registry, svc) = setup().await;
        let settings = ClientSettings {
            api_key: Some("k1".to_string()),
            ..Default::default()
        };
        let first = svc.ensure_system_client("tmdb", ClientType::Tmdb, settings.clone()).await.unwrap();
        let again = svc.ensure_system_client("tmdb", ClientType::Tmdb, settings).await.unwrap();
        assert_eq!(first.id, again.id);

        let rotated = ClientSettings {
            api_key: Some("k2".to_string()),
            ..Default::default()
        };
        let updated = svc.ensure_system_client("tmdb", ClientType::Tmdb, rotated).await.unwrap();
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.settings.api_key.as_deref(), Some("k2"));

        // visible to users, but not theirs to manage
        assert_eq!(svc.list(7).await.unwrap().len(), 1);
        assert!(matches!(svc.delete(7, first.id).await, Err(AppError::PermissionDenied(_))));
    }
}
