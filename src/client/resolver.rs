use std::sync::Arc;

use tracing::warn;

use crate::db::ClientRepo;
use crate::error::{AppError, AppResult};

use super::config::{Capability, ClientConfig};
use super::factory::ClientFactory;
use super::provider::Provider;

/// Turns `(user, client id)` into a ready adapter, enforcing ownership and
/// capability checks.
pub struct ClientResolver {
    repo: Arc<dyn ClientRepo>,
    factory: Arc<ClientFactory>,
}

impl ClientResolver {
    pub fn new(repo: Arc<dyn ClientRepo>, factory: Arc<ClientFactory>) -> Self {
        Self { repo, factory }
    }

    pub fn factory(&self) -> &ClientFactory {
        &self.factory
    }

    /// Loads the configuration and checks that `user_id` may use it.
    pub async fn config(&self, user_id: i64, client_id: i64) -> AppResult<ClientConfig> {
        let config = self.repo.get_by_id(client_id).await?;
        if !config.is_visible_to(user_id) {
            return Err(AppError::PermissionDenied(format!(
                "client {} belongs to another user",
                client_id
            )));
        }
        Ok(config)
    }

    pub async fn resolve(
        &self,
        user_id: i64,
        client_id: i64,
        capability: Option<Capability>,
    ) -> AppResult<Arc<dyn Provider>> {
        let config = self.config(user_id, client_id).await?;
        if !config.enabled {
            return Err(AppError::UnsupportedFeature(format!("client {} is disabled", client_id)));
        }
        if let Some(cap) = capability {
            if !config.supports(cap) {
                return Err(AppError::UnsupportedFeature(format!(
                    "client {} ({}) does not support {}",
                    client_id, config.client_type, cap
                )));
            }
        }
        Ok(self.factory.get(&config)?)
    }

    /// Every enabled client visible to the user that supports `capability`,
    /// in ascending client id. Clients that fail to build are skipped.
    pub async fn resolve_all(&self, user_id: i64, capability: Capability) -> AppResult<Vec<Arc<dyn Provider>>> {
        let mut configs = self.repo.get_by_user_id(user_id).await?;
        configs.sort_by_key(|c| c.id);

        let mut providers = Vec::new();
        for config in configs.iter().filter(|c| c.enabled && c.supports(capability)) {
            match self.factory.get(config) {
                Ok(p) => providers.push(p),
                Err(e) => warn!(
                    client = config.id,
                    kind = %config.client_type,
                    error = %e,
                    "skipping client that failed to initialize"
                ),
            }
        }
        Ok(providers)
    }

    pub fn invalidate(&self, client_id: i64) {
        self.factory.invalidate(client_id);
    }
}
