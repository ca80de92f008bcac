use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::*;

use super::config::{Capabilities, Capability, ClientType};
use super::error::{ProviderError, ProviderResult};

/// An entry of the play history reported by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryEntry {
    pub client_id: i64,
    pub media_type: MediaType,
    pub item_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub play_count: i32,
}

/// A vendor client normalizing its API into the internal item model.
///
/// Every domain operation has a default implementation that reports the
/// feature as unsupported, so adapters only implement what their vendor
/// offers. Callers must check [`Provider::supports`] before fanning out.
#[async_trait]
pub trait Provider: Send + Sync {
    fn client_id(&self) -> i64;
    fn client_type(&self) -> ClientType;
    fn capabilities(&self) -> Capabilities;

    fn supports(&self, cap: Capability) -> bool {
        self.capabilities().supports(cap)
    }

    async fn test_connection(&self) -> ProviderResult<()>;

    async fn get_movies(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Movie>>> {
        Err(ProviderError::unsupported("movies"))
    }
    async fn get_movie(&self, _id: &str) -> ProviderResult<MediaItem<Movie>> {
        Err(ProviderError::unsupported("movies"))
    }

    async fn get_series_list(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Series>>> {
        Err(ProviderError::unsupported("series"))
    }
    async fn get_series(&self, _id: &str) -> ProviderResult<MediaItem<Series>> {
        Err(ProviderError::unsupported("series"))
    }
    async fn get_seasons(&self, _series_id: &str) -> ProviderResult<Vec<MediaItem<Season>>> {
        Err(ProviderError::unsupported("series"))
    }
    async fn get_episodes(&self, _series_id: &str, _season: i32) -> ProviderResult<Vec<MediaItem<Episode>>> {
        Err(ProviderError::unsupported("series"))
    }

    async fn get_tracks(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Track>>> {
        Err(ProviderError::unsupported("tracks"))
    }
    async fn get_track(&self, _id: &str) -> ProviderResult<MediaItem<Track>> {
        Err(ProviderError::unsupported("tracks"))
    }
    async fn get_albums(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Album>>> {
        Err(ProviderError::unsupported("albums"))
    }
    async fn get_album(&self, _id: &str) -> ProviderResult<MediaItem<Album>> {
        Err(ProviderError::unsupported("albums"))
    }
    async fn get_artists(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Artist>>> {
        Err(ProviderError::unsupported("artists"))
    }
    async fn get_artist(&self, _id: &str) -> ProviderResult<MediaItem<Artist>> {
        Err(ProviderError::unsupported("artists"))
    }

    async fn get_playlists(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Playlist>>> {
        Err(ProviderError::unsupported("playlists"))
    }
    /// Fetches the playlist with its items in order.
    async fn get_playlist(&self, _id: &str) -> ProviderResult<MediaItem<Playlist>> {
        Err(ProviderError::unsupported("playlists"))
    }
    async fn create_playlist(&self, _name: &str, _description: &str) -> ProviderResult<MediaItem<Playlist>> {
        Err(ProviderError::unsupported("playlist creation"))
    }
    async fn update_playlist(&self, _id: &str, _name: &str, _description: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("playlist updates"))
    }
    async fn delete_playlist(&self, _id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("playlist deletion"))
    }
    async fn add_playlist_item(&self, _id: &str, _item_id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("playlist item add"))
    }
    async fn remove_playlist_item(&self, _id: &str, _item_id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("playlist item removal"))
    }
    async fn reorder_playlist_items(&self, _id: &str, _item_ids: &[String]) -> ProviderResult<()> {
        Err(ProviderError::unsupported("playlist reorder"))
    }

    async fn get_collections(&self, _options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Collection>>> {
        Err(ProviderError::unsupported("collections"))
    }
    async fn get_collection(&self, _id: &str) -> ProviderResult<MediaItem<Collection>> {
        Err(ProviderError::unsupported("collections"))
    }
    async fn create_collection(&self, _name: &str, _description: &str) -> ProviderResult<MediaItem<Collection>> {
        Err(ProviderError::unsupported("collection creation"))
    }
    async fn update_collection(&self, _id: &str, _name: &str, _description: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("collection updates"))
    }
    async fn delete_collection(&self, _id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("collection deletion"))
    }
    async fn add_collection_item(&self, _id: &str, _item_id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("collection item add"))
    }
    async fn remove_collection_item(&self, _id: &str, _item_id: &str) -> ProviderResult<()> {
        Err(ProviderError::unsupported("collection item removal"))
    }
    async fn reorder_collection_items(&self, _id: &str, _item_ids: &[String]) -> ProviderResult<()> {
        Err(ProviderError::unsupported("collection reorder"))
    }

    async fn get_play_history(&self, _options: &QueryOptions) -> ProviderResult<Vec<WatchHistoryEntry>> {
        Err(ProviderError::unsupported("history"))
    }
}

/// For vendors whose API has no person search: fail actor and creator
/// queries so a fan-out leaves the client out instead of returning its
/// whole library.
pub fn reject_people_filter(options: &QueryOptions) -> ProviderResult<()> {
    if options.filters_people() {
        return Err(ProviderError::unsupported("actor and creator filters"));
    }
    Ok(())
}

/// A payload type that can be queried from providers.
#[async_trait]
pub trait Fetchable: MediaData {
    const CAPABILITY: Capability;

    async fn fetch_all(provider: &dyn Provider, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Self>>>;
    async fn fetch_one(provider: &dyn Provider, id: &str) -> ProviderResult<MediaItem<Self>>;
}

macro_rules! impl_fetchable {
    ($($ty:ty => $cap:expr, $all:ident, $one:ident;)*) => {
        $(
            #[async_trait]
            impl Fetchable for $ty {
                const CAPABILITY: Capability = $cap;

                async fn fetch_all(provider: &dyn Provider, options: &QueryOptions) -> ProviderResult<Vec<MediaItem<Self>>> {
                    provider.$all(options).await
                }

                async fn fetch_one(provider: &dyn Provider, id: &str) -> ProviderResult<MediaItem<Self>> {
                    provider.$one(id).await
                }
            }
        )*
    };
}

impl_fetchable! {
    Movie => Capability::Movies, get_movies, get_movie;
    Series => Capability::Series, get_series_list, get_series;
    Track => Capability::Music, get_tracks, get_track;
    Album => Capability::Music, get_albums, get_album;
    Artist => Capability::Music, get_artists, get_artist;
    Playlist => Capability::Playlists, get_playlists, get_playlist;
    Collection => Capability::Collections, get_collections, get_collection;
}

/// List mutations on a provider, dispatched by payload type.
#[async_trait]
pub trait ClientList: ListPayload + Fetchable {
    async fn create_on(provider: &dyn Provider, name: &str, description: &str) -> ProviderResult<MediaItem<Self>>;
    async fn update_on(provider: &dyn Provider, id: &str, name: &str, description: &str) -> ProviderResult<()>;
    async fn delete_on(provider: &dyn Provider, id: &str) -> ProviderResult<()>;
    async fn add_on(provider: &dyn Provider, id: &str, item_id: &str) -> ProviderResult<()>;
    async fn remove_on(provider: &dyn Provider, id: &str, item_id: &str) -> ProviderResult<()>;
    async fn reorder_on(provider: &dyn Provider, id: &str, item_ids: &[String]) -> ProviderResult<()>;
}

macro_rules! impl_client_list {
    ($ty:ty, $create:ident, $update:ident, $delete:ident, $add:ident, $remove:ident, $reorder:ident) => {
        #[async_trait]
        impl ClientList for $ty {
            async fn create_on(provider: &dyn Provider, name: &str, description: &str) -> ProviderResult<MediaItem<Self>> {
                provider.$create(name, description).await
            }
            async fn update_on(provider: &dyn Provider, id: &str, name: &str, description: &str) -> ProviderResult<()> {
                provider.$update(id, name, description).await
            }
            async fn delete_on(provider: &dyn Provider, id: &str) -> ProviderResult<()> {
                provider.$delete(id).await
            }
            async fn add_on(provider: &dyn Provider, id: &str, item_id: &str) -> ProviderResult<()> {
                provider.$add(id, item_id).await
            }
            async fn remove_on(provider: &dyn Provider, id: &str, item_id: &str) -> ProviderResult<()> {
                provider.$remove(id, item_id).await
            }
            async fn reorder_on(provider: &dyn Provider, id: &str, item_ids: &[String]) -> ProviderResult<()> {
                provider.$reorder(id, item_ids).await
            }
        }
    };
}

impl_client_list!(
    Playlist,
    create_playlist,
    update_playlist,
    delete_playlist,
    add_playlist_item,
    remove_playlist_item,
    reorder_playlist_items
);
impl_client_list!(
    Collection,
    create_collection,
    update_collection,
    delete_collection,
    add_collection_item,
    remove_collection_item,
    reorder_collection_items
);
