use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::ProvidersConfig;

use super::arr::ArrClient;
use super::config::{ClientConfig, ClientType};
use super::emby::EmbyClient;
use super::error::{ProviderError, ProviderResult};
use super::plex::PlexClient;
use super::provider::Provider;
use super::subsonic::SubsonicClient;
use super::tmdb::TmdbClient;

pub type Builder = Arc<dyn Fn(&ClientConfig, Client) -> ProviderResult<Arc<dyn Provider>> + Send + Sync>;

/// Builds provider adapters from stored configuration.
///
/// Adapters are cached per client id and rebuilt when the configuration's
/// `updated_at` moves.
pub struct ClientFactory {
    http: Client,
    builders: RwLock<HashMap<ClientType, Builder>>,
    cache: RwLock<HashMap<i64, (DateTime<Utc>, Arc<dyn Provider>)>>,
}

fn builder<P, F>(f: F) -> Builder
where
    P: Provider + 'static,
    F: Fn(&ClientConfig, Client) -> ProviderResult<P> + Send + Sync + 'static,
{
    Arc::new(move |cfg: &ClientConfig, http: Client| {
        let provider = f(cfg, http)?;
        Ok::<_, ProviderError>(Arc::new(provider) as Arc<dyn Provider>)
    })
}

// Every write is a single map call, so a poisoned lock still guards a
// consistent map.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("provider factory lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("provider factory lock poisoned, recovering");
        poisoned.into_inner()
    })
}

pub fn http_client(config: &ProvidersConfig) -> ProviderResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ProviderError::InvalidConfig(format!("http client: {}", e)))
}

impl ClientFactory {
    /// A factory with no builders registered.
    pub fn empty(http: Client) -> Self {
        Self {
            http,
            builders: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// A factory with the adapter for every supported vendor.
    pub fn new(http: Client) -> Self {
        let factory = Self::empty(http);
        factory.register(ClientType::Jellyfin, builder(EmbyClient::new));
        factory.register(ClientType::Emby, builder(EmbyClient::new));
        factory.register(ClientType::Plex, builder(PlexClient::new));
        factory.register(ClientType::Subsonic, builder(SubsonicClient::new));
        factory.register(ClientType::Tmdb, builder(TmdbClient::new));
        factory.register(ClientType::Radarr, builder(ArrClient::new));
        factory.register(ClientType::Sonarr, builder(ArrClient::new));
        factory.register(ClientType::Lidarr, builder(ArrClient::new));
        factory
    }

    pub fn from_config(config: &ProvidersConfig) -> ProviderResult<Self> {
        Ok(Self::new(http_client(config)?))
    }

    pub fn register(&self, client_type: ClientType, builder: Builder) {
        write_lock(&self.builders).insert(client_type, builder);
        // a new builder must not be shadowed by adapters built before it
        write_lock(&self.cache).clear();
    }

    /// Builds a fresh adapter without touching the cache.
    pub fn build(&self, config: &ClientConfig) -> ProviderResult<Arc<dyn Provider>> {
        let builder = read_lock(&self.builders)
            .get(&config.client_type)
            .cloned()
            .ok_or_else(|| ProviderError::unsupported(config.client_type.as_str()))?;
        builder(config, self.http.clone())
    }

    /// Returns the cached adapter for this configuration, building it if the
    /// cache is empty or stale.
    pub fn get(&self, config: &ClientConfig) -> ProviderResult<Arc<dyn Provider>> {
        if let Some((updated_at, provider)) = read_lock(&self.cache).get(&config.id) {
            if *updated_at == config.updated_at {
                return Ok(provider.clone());
            }
        }
        debug!(client = config.id, kind = %config.client_type, "building provider");
        let provider = self.build(config)?;
        write_lock(&self.cache).insert(config.id, (config.updated_at, provider.clone()));
        Ok(provider)
    }

    pub fn invalidate(&self, client_id: i64) {
        write_lock(&self.cache).remove(&client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Capabilities, ClientSettings};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Dummy(i64);

    #[async_trait]
    impl Provider for Dummy {
        fn client_id(&self) -> i64 {
            self.0
        }
        fn client_type(&self) -> ClientType {
            ClientType::Jellyfin
        }
        fn capabilities(&self) -> Capabilities {
            ClientType::Jellyfin.capabilities()
        }
        async fn test_connection(&self) -> ProviderResult<()> {
            Ok(())
        }
    }

    fn config(id: i64) -> ClientConfig {
        let mut cfg = ClientConfig::new(
            1,
            "jf",
            ClientType::Jellyfin,
            ClientSettings {
                base_url: "http://jf".to_string(),
                ..Default::default()
            },
        );
        cfg.id = id;
        cfg
    }

    #[test]
    fn test_cache_and_invalidate() {
        let built = Arc::new(AtomicUsize::new(0));
        let factory = ClientFactory::empty(Client::new());
        let counter = built.clone();
        factory.register(
            ClientType::Jellyfin,
            Arc::new(move |cfg: &ClientConfig, _: Client| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(Arc::new(Dummy(cfg.id)) as Arc<dyn Provider>)
            }),
        );

        let mut cfg = config(5);
        factory.get(&cfg).unwrap();
        factory.get(&cfg).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);

        cfg.updated_at = cfg.updated_at + chrono::Duration::seconds(1);
        factory.get(&cfg).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);

        factory.invalidate(5);
        factory.get(&cfg).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_invalidate_survives_poisoned_cache() {
        let built = Arc::new(AtomicUsize::new(0));
        let factory = ClientFactory::empty(Client::new());
        let counter = built.clone();
        factory.register(
            ClientType::Jellyfin,
            Arc::new(move |cfg: &ClientConfig, _: Client| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(Arc::new(Dummy(cfg.id)) as Arc<dyn Provider>)
            }),
        );
        let cfg = config(7);
        factory.get(&cfg).unwrap();

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = factory.cache.write().unwrap();
            panic!("writer died");
        }));
        assert!(panicked.is_err());
        assert!(factory.cache.is_poisoned());

        factory.get(&cfg).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        factory.invalidate(7);
        factory.get(&cfg).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unregistered_type() {
        let factory = ClientFactory::empty(Client::new());
        let res = factory.build(&config(1));
        assert!(matches!(res, Err(ProviderError::Unsupported(_))));
    }
}
