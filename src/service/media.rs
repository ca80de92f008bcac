use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ClientResolver, Fetchable};
use crate::db::{DbError, MediaIndexRepo, MediaItemRepo, UserDataRepo, UserMediaItemData};
use crate::error::AppResult;
use crate::media::*;

use super::aggregate::FanOut;

/// An item annotated with the caller's overlay record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithUserData<T> {
    #[serde(flatten)]
    pub item: MediaItem<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserMediaItemData>,
}

/// Aggregation over every client that can serve payload `T`.
pub struct MediaService<T: MediaData> {
    resolver: Arc<ClientResolver>,
    items: Arc<dyn MediaItemRepo<T>>,
    index: Arc<dyn MediaIndexRepo>,
    user_data: Arc<dyn UserDataRepo>,
    fan_out: FanOut,
    shutdown: CancellationToken,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Fetchable> MediaService<T> {
    pub fn new(
        resolver: Arc<ClientResolver>,
        items: Arc<dyn MediaItemRepo<T>>,
        index: Arc<dyn MediaIndexRepo>,
        user_data: Arc<dyn UserDataRepo>,
        fan_out: FanOut,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            items,
            index,
            user_data,
            fan_out,
            shutdown,
            _payload: PhantomData,
        }
    }

    pub async fn get_by_id(&self, user_id: i64, client_id: i64, external_id: &str) -> AppResult<MediaItem<T>> {
        let provider = self.resolver.resolve(user_id, client_id, Some(T::CAPABILITY)).await?;
        Ok(T::fetch_one(provider.as_ref(), external_id).await?)
    }

    /// Queries a single client; errors propagate.
    pub async fn get_client_items(
        &self,
        user_id: i64,
        client_id: i64,
        options: &QueryOptions,
    ) -> AppResult<Vec<MediaItem<T>>> {
        let provider = self.resolver.resolve(user_id, client_id, Some(T::CAPABILITY)).await?;
        let mut items = T::fetch_all(provider.as_ref(), &provider_options(options)).await?;
        sort_and_paginate(&mut items, options);
        Ok(items)
    }

    /// Fans the query out over every capable client of the user. Clients
    /// that fail or time out are left out; duplicates across clients stay.
    pub async fn search_across(&self, user_id: i64, options: &QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let providers = self.resolver.resolve_all(user_id, T::CAPABILITY).await?;
        debug!(user = user_id, kind = %T::MEDIA_TYPE, clients = providers.len(), "search across clients");

        let per_provider = provider_options(options);
        let mut items = self
            .fan_out
            .run(providers, &self.shutdown, move |provider| {
                let options = per_provider.clone();
                async move { T::fetch_all(provider.as_ref(), &options).await }
            })
            .await;
        sort_and_paginate(&mut items, options);
        Ok(items)
    }

    pub async fn get_by_genre(&self, user_id: i64, genre: &str, options: QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            genre: Some(genre.to_string()),
            ..options
        };
        self.search_across(user_id, &options).await
    }

    pub async fn get_by_year(&self, user_id: i64, year: i32, options: QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            year: Some(year),
            ..options
        };
        self.search_across(user_id, &options).await
    }

    pub async fn get_by_actor(&self, user_id: i64, actor: &str, options: QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            actor: Some(actor.to_string()),
            ..options
        };
        self.search_across(user_id, &options).await
    }

    pub async fn get_by_creator(&self, user_id: i64, creator: &str, options: QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            creator: Some(creator.to_string()),
            ..options
        };
        self.search_across(user_id, &options).await
    }

    pub async fn get_by_studio(&self, user_id: i64, studio: &str, options: QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            studio: Some(studio.to_string()),
            ..options
        };
        self.search_across(user_id, &options).await
    }

    pub async fn get_recently_added(&self, user_id: i64, limit: usize) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            recently_added: true,
            ..QueryOptions::default().with_sort(SortField::AddedAt).with_limit(limit)
        };
        self.search_across(user_id, &options).await
    }

    pub async fn get_top_rated(&self, user_id: i64, limit: usize) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions::default().with_sort(SortField::Rating).with_limit(limit);
        self.search_across(user_id, &options).await
    }

    pub async fn get_popular(&self, user_id: i64, limit: usize) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions::default().with_sort(SortField::Popularity).with_limit(limit);
        self.search_across(user_id, &options).await
    }

    /// Items the client accounts marked as favorite.
    pub async fn get_favorites(&self, user_id: i64, options: QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            favorites: true,
            ..options
        };
        self.search_across(user_id, &options).await
    }

    /// Returns the stored item for `(client_id, external_id)`, fetching and
    /// persisting it on first use.
    pub async fn import(&self, user_id: i64, client_id: i64, external_id: &str) -> AppResult<MediaItem<T>> {
        let provider = self.resolver.resolve(user_id, client_id, Some(T::CAPABILITY)).await?;
        match self.items.get_by_client_item_id(client_id, external_id).await {
            Ok(item) => return Ok(item),
            Err(DbError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let fetched = T::fetch_one(provider.as_ref(), external_id).await?;
        let mut item = MediaItem::new(fetched.data);
        item.sync_clients.merge(&fetched.sync_clients);
        item.sync_clients
            .add_or_update(client_id, provider.client_type(), external_id);

        match self.items.create(&item).await {
            Ok(created) => {
                info!(id = created.id, client = client_id, external_id, kind = %T::MEDIA_TYPE, "imported item");
                Ok(created)
            }
            // raced with a concurrent import
            Err(DbError::AlreadyExists(_)) => Ok(self.items.get_by_client_item_id(client_id, external_id).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored item by internal id.
    pub async fn get_local(&self, id: i64) -> AppResult<MediaItem<T>> {
        Ok(self.items.get_by_id(id).await?)
    }

    pub async fn search_local(&self, options: &QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        Ok(self.items.search(options).await?)
    }

    pub async fn get_recent_local(&self, days: i64, limit: usize) -> AppResult<Vec<MediaItem<T>>> {
        Ok(self.items.get_recent_items(days, limit).await?)
    }

    /// Pairs every item with the user's overlay record. Transient items are
    /// matched through their sync pairs.
    pub async fn with_user_data(&self, user_id: i64, items: Vec<MediaItem<T>>) -> AppResult<Vec<WithUserData<T>>> {
        let mut internal = Vec::with_capacity(items.len());
        for item in &items {
            let id = if item.is_transient() {
                let mut found = None;
                for pair in item.sync_clients.iter() {
                    found = self.index.find_by_client_item_id(pair.client_id, &pair.item_id).await?;
                    if found.is_some() {
                        break;
                    }
                }
                found
            } else {
                Some(item.id)
            };
            internal.push(id);
        }

        let ids: Vec<i64> = internal.iter().flatten().copied().collect();
        let records: HashMap<i64, UserMediaItemData> = self
            .user_data
            .get_many(user_id, &ids)
            .await?
            .into_iter()
            .map(|d| (d.media_item_id, d))
            .collect();

        Ok(items
            .into_iter()
            .zip(internal)
            .map(|(item, id)| WithUserData {
                user_data: id.and_then(|id| records.get(&id).cloned()),
                item,
            })
            .collect())
    }
}

impl MediaService<Series> {
    pub async fn get_seasons(&self, user_id: i64, client_id: i64, series_id: &str) -> AppResult<Vec<MediaItem<Season>>> {
        let provider = self.resolver.resolve(user_id, client_id, Some(Series::CAPABILITY)).await?;
        let mut seasons = provider.get_seasons(series_id).await?;
        seasons.sort_by_key(|s| s.data.number);
        Ok(seasons)
    }

    pub async fn get_episodes(
        &self,
        user_id: i64,
        client_id: i64,
        series_id: &str,
        season: i32,
    ) -> AppResult<Vec<MediaItem<Episode>>> {
        let provider = self.resolver.resolve(user_id, client_id, Some(Series::CAPABILITY)).await?;
        let mut episodes = provider.get_episodes(series_id, season).await?;
        episodes.sort_by_key(|e| e.data.episode_number);
        Ok(episodes)
    }
}

/// Providers get enough rows to fill `offset + limit` after the merge; the
/// offset itself is applied once, after sorting.
fn provider_options(options: &QueryOptions) -> QueryOptions {
    QueryOptions {
        limit: options.provider_limit(),
        offset: None,
        ..options.clone()
    }
}
