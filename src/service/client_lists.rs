use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{ClientList, ClientResolver, Provider};
use crate::error::{AppError, AppResult};
use crate::media::*;

use super::aggregate::FanOut;

/// Playlists and collections living on one client. Every mutation targets a
/// single client and returns the refreshed list, stamped with the change.
pub struct ClientListService<T: MediaData> {
    resolver: Arc<ClientResolver>,
    fan_out: FanOut,
    shutdown: CancellationToken,
    _payload: PhantomData<fn() -> T>,
}

impl<T: ClientList> ClientListService<T> {
    pub fn new(resolver: Arc<ClientResolver>, fan_out: FanOut, shutdown: CancellationToken) -> Self {
        Self {
            resolver,
            fan_out,
            shutdown,
            _payload: PhantomData,
        }
    }

    async fn provider(&self, user_id: i64, client_id: i64) -> AppResult<Arc<dyn Provider>> {
        self.resolver.resolve(user_id, client_id, Some(T::CAPABILITY)).await
    }

    async fn refreshed(
        &self,
        provider: &dyn Provider,
        list_id: &str,
        item_id: &str,
        change: ChangeType,
    ) -> AppResult<MediaItem<T>> {
        let mut list = T::fetch_one(provider, list_id).await?;
        list.data.list_mut().stamp(provider.client_id(), item_id, change);
        Ok(list)
    }

    pub async fn get_lists(&self, user_id: i64, client_id: i64, options: &QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let provider = self.provider(user_id, client_id).await?;
        let mut lists = T::fetch_all(provider.as_ref(), options).await?;
        sort_and_paginate(&mut lists, options);
        Ok(lists)
    }

    pub async fn get_list(&self, user_id: i64, client_id: i64, list_id: &str) -> AppResult<MediaItem<T>> {
        let provider = self.provider(user_id, client_id).await?;
        Ok(T::fetch_one(provider.as_ref(), list_id).await?)
    }

    pub async fn get_list_items(&self, user_id: i64, client_id: i64, list_id: &str) -> AppResult<Vec<ListItem>> {
        let list = self.get_list(user_id, client_id, list_id).await?;
        let mut items = list.data.list().items.clone();
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    pub async fn create(&self, user_id: i64, client_id: i64, name: &str, description: &str) -> AppResult<MediaItem<T>> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidArgument("list name must not be empty".to_string()));
        }
        let provider = self.provider(user_id, client_id).await?;
        let mut created = T::create_on(provider.as_ref(), name.trim(), description).await?;
        created.data.list_mut().stamp(client_id, "", ChangeType::Add);
        info!(client = client_id, title = created.title(), kind = %T::MEDIA_TYPE, "created list on client");
        Ok(created)
    }

    pub async fn update(
        &self,
        user_id: i64,
        client_id: i64,
        list_id: &str,
        name: &str,
        description: &str,
    ) -> AppResult<MediaItem<T>> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidArgument("list name must not be empty".to_string()));
        }
        let provider = self.provider(user_id, client_id).await?;
        T::update_on(provider.as_ref(), list_id, name.trim(), description).await?;
        self.refreshed(provider.as_ref(), list_id, "", ChangeType::Update).await
    }

    pub async fn delete(&self, user_id: i64, client_id: i64, list_id: &str) -> AppResult<()> {
        let provider = self.provider(user_id, client_id).await?;
        T::delete_on(provider.as_ref(), list_id).await?;
        info!(client = client_id, list = list_id, kind = %T::MEDIA_TYPE, "deleted list on client");
        Ok(())
    }

    pub async fn add_item(&self, user_id: i64, client_id: i64, list_id: &str, item_id: &str) -> AppResult<MediaItem<T>> {
        let provider = self.provider(user_id, client_id).await?;
        T::add_on(provider.as_ref(), list_id, item_id).await?;
        self.refreshed(provider.as_ref(), list_id, item_id, ChangeType::Add).await
    }

    pub async fn remove_item(&self, user_id: i64, client_id: i64, list_id: &str, item_id: &str) -> AppResult<MediaItem<T>> {
        let provider = self.provider(user_id, client_id).await?;
        T::remove_on(provider.as_ref(), list_id, item_id).await?;
        self.refreshed(provider.as_ref(), list_id, item_id, ChangeType::Remove).await
    }

    /// Validates the ordering against the client's current items before
    /// sending it.
    pub async fn reorder(
        &self,
        user_id: i64,
        client_id: i64,
        list_id: &str,
        item_ids: &[String],
    ) -> AppResult<MediaItem<T>> {
        let provider = self.provider(user_id, client_id).await?;
        let current = T::fetch_one(provider.as_ref(), list_id).await?;
        let mut check = current.data.list().clone();
        check.reorder(item_ids, client_id)?;

        T::reorder_on(provider.as_ref(), list_id, item_ids).await?;
        self.refreshed(provider.as_ref(), list_id, "", ChangeType::Reorder).await
    }

    /// Lists from every capable client of the user.
    pub async fn search_across(&self, user_id: i64, options: &QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let providers = self.resolver.resolve_all(user_id, T::CAPABILITY).await?;
        let per_provider = QueryOptions {
            limit: options.provider_limit(),
            offset: None,
            ..options.clone()
        };
        let mut lists = self
            .fan_out
            .run(providers, &self.shutdown, move |provider| {
                let options = per_provider.clone();
                async move { T::fetch_all(provider.as_ref(), &options).await }
            })
            .await;
        lists.retain(|l| options.matches(l.data.details()));
        sort_and_paginate(&mut lists, options);
        Ok(lists)
    }
}
