use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::client::{ClientCategory, ClientConfig};
use crate::media::{MediaData, MediaItem, MediaItemList, MediaType, QueryOptions, SyncClients};

use super::model::*;

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_user(&self, username: &str) -> DbResult<User>;
    async fn get_user_by_id(&self, id: i64) -> DbResult<User>;
    /// Inserts a new user and returns it with its id.
    async fn create_user(&self, username: &str, password_hash: &str) -> DbResult<User>;
    async fn update_last_login(&self, id: i64, at: DateTime<Utc>) -> DbResult<()>;
}

#[async_trait]
pub trait AccessTokenRepo: Send + Sync {
    async fn get_token(&self, token: &str) -> DbResult<AccessToken>;
    async fn upsert_token(&self, token: &AccessToken) -> DbResult<()>;
    async fn delete_token(&self, token: &str) -> DbResult<()>;
}

#[async_trait]
pub trait ClientRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DbResult<ClientConfig>;
    /// Clients owned by the user, plus system clients.
    async fn get_by_user_id(&self, user_id: i64) -> DbResult<Vec<ClientConfig>>;
    async fn get_by_category(&self, user_id: i64, category: ClientCategory) -> DbResult<Vec<ClientConfig>>;
    async fn create(&self, config: &ClientConfig) -> DbResult<ClientConfig>;
    async fn update(&self, config: &ClientConfig) -> DbResult<ClientConfig>;
    async fn delete(&self, id: i64) -> DbResult<()>;
}

/// Persistence for one payload type.
#[async_trait]
pub trait MediaItemRepo<T: MediaData>: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DbResult<MediaItem<T>>;
    /// Items in the order of `ids`; unknown ids are skipped.
    async fn get_by_ids(&self, ids: &[i64]) -> DbResult<Vec<MediaItem<T>>>;
    async fn get_by_client_item_id(&self, client_id: i64, item_id: &str) -> DbResult<MediaItem<T>>;
    async fn get_by_owner(&self, owner_id: i64) -> DbResult<Vec<MediaItem<T>>>;
    async fn search(&self, options: &QueryOptions) -> DbResult<Vec<MediaItem<T>>>;
    async fn get_recent_items(&self, days: i64, limit: usize) -> DbResult<Vec<MediaItem<T>>>;
    async fn create(&self, item: &MediaItem<T>) -> DbResult<MediaItem<T>>;
    /// Compare-and-swap on `item.version`; a stale version is a conflict.
    async fn update(&self, item: &MediaItem<T>) -> DbResult<MediaItem<T>>;
    async fn delete(&self, id: i64) -> DbResult<()>;
}

/// Lookups across all payload types.
#[async_trait]
pub trait MediaIndexRepo: Send + Sync {
    async fn get_all_media_items_by_ids(&self, ids: &[i64]) -> DbResult<MediaItemList>;
    async fn get_sync_clients(&self, ids: &[i64]) -> DbResult<HashMap<i64, SyncClients>>;
    async fn find_by_client_item_id(&self, client_id: i64, item_id: &str) -> DbResult<Option<i64>>;
    async fn get_media_type(&self, id: i64) -> DbResult<MediaType>;
}

#[async_trait]
pub trait UserDataRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DbResult<UserMediaItemData>;
    async fn get(&self, user_id: i64, media_item_id: i64) -> DbResult<UserMediaItemData>;
    async fn get_many(&self, user_id: i64, media_item_ids: &[i64]) -> DbResult<Vec<UserMediaItemData>>;
    /// Insert or update keyed on `(user_id, media_item_id)`.
    async fn upsert(&self, data: &UserMediaItemData) -> DbResult<UserMediaItemData>;
    async fn get_continue_watching(&self, user_id: i64, limit: usize) -> DbResult<Vec<UserMediaItemData>>;
    async fn get_history(
        &self,
        user_id: i64,
        media_type: Option<MediaType>,
        limit: usize,
        offset: usize,
    ) -> DbResult<Vec<UserMediaItemData>>;
    async fn get_played_since(&self, user_id: i64, since: DateTime<Utc>) -> DbResult<Vec<UserMediaItemData>>;
    async fn get_favorites(&self, user_id: i64, media_type: Option<MediaType>) -> DbResult<Vec<UserMediaItemData>>;
    async fn delete(&self, id: i64) -> DbResult<()>;
    async fn clear_history(&self, user_id: i64) -> DbResult<u64>;
}
