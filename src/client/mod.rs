pub mod arr;
pub mod config;
pub mod emby;
pub mod error;
pub mod factory;
pub mod plex;
pub mod provider;
pub mod resolver;
pub mod subsonic;
pub mod tmdb;

#[cfg(test)]
pub mod testing;

pub use config::{
    Capabilities, Capability, ClientCategory, ClientConfig, ClientSettings, ClientType, SYSTEM_USER,
};
pub use error::{ProviderError, ProviderResult};
pub use factory::ClientFactory;
pub use provider::{ClientList, Fetchable, Provider, WatchHistoryEntry};
pub use resolver::ClientResolver;
