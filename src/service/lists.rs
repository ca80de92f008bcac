use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{ClientList, ClientResolver, Provider, ProviderError};
use crate::db::{MediaIndexRepo, MediaItemRepo};
use crate::error::{AppError, AppResult};
use crate::media::*;

/// Fields of a list that can be changed in place.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    /// The version the caller last read; a mismatch is a conflict.
    pub version: Option<i64>,
}

/// Result of syncing one list to one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub client_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_list_id: Option<String>,
    /// Items added on the client.
    pub pushed: usize,
    /// Items removed on the client.
    pub removed: usize,
    /// Items added locally from the client.
    pub pulled: usize,
    /// Local items with no id on the client.
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// User-owned lists stored locally. Item ids are internal media item ids.
pub struct ListService<T: MediaData> {
    items: Arc<dyn MediaItemRepo<T>>,
    index: Arc<dyn MediaIndexRepo>,
    resolver: Arc<ClientResolver>,
}

impl<T: ClientList> ListService<T> {
    pub fn new(items: Arc<dyn MediaItemRepo<T>>, index: Arc<dyn MediaIndexRepo>, resolver: Arc<ClientResolver>) -> Self {
        Self { items, index, resolver }
    }

    pub async fn create(&self, user_id: i64, name: &str, description: &str, is_public: bool) -> AppResult<MediaItem<T>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidArgument("list name must not be empty".to_string()));
        }
        let mut details = Details::titled(name);
        details.description = description.to_string();
        let mut list = ListData::owned_by(user_id);
        list.is_public = is_public;

        let item = MediaItem::new(T::new_list(details, list)).with_owner(user_id);
        let created = self.items.create(&item).await?;
        info!(id = created.id, user = user_id, kind = %T::MEDIA_TYPE, "created list");
        Ok(created)
    }

    pub async fn get(&self, user_id: i64, id: i64) -> AppResult<MediaItem<T>> {
        let item = self.items.get_by_id(id).await?;
        if !item.data.list().can_read(user_id) {
            return Err(AppError::PermissionDenied(format!("{} {} is not shared with you", T::MEDIA_TYPE, id)));
        }
        Ok(item)
    }

    async fn get_writable(&self, user_id: i64, id: i64) -> AppResult<MediaItem<T>> {
        let item = self.get(user_id, id).await?;
        if !item.data.list().can_write(user_id) {
            return Err(AppError::PermissionDenied(format!("{} {} is read-only for you", T::MEDIA_TYPE, id)));
        }
        Ok(item)
    }

    async fn get_owned(&self, user_id: i64, id: i64) -> AppResult<MediaItem<T>> {
        let item = self.get(user_id, id).await?;
        if !item.data.list().is_owner(user_id) {
            return Err(AppError::PermissionDenied(format!("only the owner can do this to {} {}", T::MEDIA_TYPE, id)));
        }
        Ok(item)
    }

    /// Saves with compare-and-swap on the version the item was read at.
    async fn save(&self, item: &MediaItem<T>) -> AppResult<MediaItem<T>> {
        Ok(self.items.update(item).await?)
    }

    pub async fn get_user_lists(&self, user_id: i64) -> AppResult<Vec<MediaItem<T>>> {
        Ok(self.items.get_by_owner(user_id).await?)
    }

    /// The list's items, resolved across media types, in list order.
    pub async fn get_items(&self, user_id: i64, id: i64) -> AppResult<MediaItemList> {
        let list = self.get(user_id, id).await?;
        let ids = internal_ids(list.data.list());
        Ok(self.index.get_all_media_items_by_ids(&ids).await?)
    }

    pub async fn search(&self, user_id: i64, options: &QueryOptions) -> AppResult<Vec<MediaItem<T>>> {
        let options = QueryOptions {
            owner_id: Some(user_id),
            ..options.clone()
        };
        Ok(self.items.search(&options).await?)
    }

    pub async fn update(&self, user_id: i64, id: i64, update: ListUpdate) -> AppResult<MediaItem<T>> {
        let mut item = self.get_writable(user_id, id).await?;
        if let Some(version) = update.version {
            if version != item.version {
                return Err(AppError::Conflict(format!(
                    "{} {} is at version {}, not {}",
                    T::MEDIA_TYPE,
                    id,
                    item.version,
                    version
                )));
            }
        }
        if update.is_public.is_some() && !item.data.list().is_owner(user_id) {
            return Err(AppError::PermissionDenied("only the owner can change visibility".to_string()));
        }
        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::InvalidArgument("list name must not be empty".to_string()));
            }
            item.data.details_mut().title = name;
        }
        if let Some(description) = update.description {
            item.data.details_mut().description = description;
        }
        if let Some(is_public) = update.is_public {
            item.data.list_mut().is_public = is_public;
        }
        item.data.list_mut().stamp(LOCAL_CLIENT, "", ChangeType::Update);
        self.save(&item).await
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> AppResult<()> {
        self.get_owned(user_id, id).await?;
        self.items.delete(id).await?;
        info!(id, user = user_id, kind = %T::MEDIA_TYPE, "deleted list");
        Ok(())
    }

    pub async fn add_item(&self, user_id: i64, id: i64, item_id: i64) -> AppResult<MediaItem<T>> {
        let mut list = self.get_writable(user_id, id).await?;
        // the referenced item must exist
        self.index.get_media_type(item_id).await?;
        list.data.list_mut().add_item(&item_id.to_string(), LOCAL_CLIENT)?;
        self.save(&list).await
    }

    pub async fn remove_item(&self, user_id: i64, id: i64, item_id: i64) -> AppResult<MediaItem<T>> {
        let mut list = self.get_writable(user_id, id).await?;
        list.data.list_mut().remove_item(&item_id.to_string(), LOCAL_CLIENT)?;
        self.save(&list).await
    }

    /// `item_ids` must contain every item of the list exactly once.
    pub async fn reorder(&self, user_id: i64, id: i64, item_ids: &[i64]) -> AppResult<MediaItem<T>> {
        let mut list = self.get_writable(user_id, id).await?;
        let ids: Vec<String> = item_ids.iter().map(|i| i.to_string()).collect();
        list.data.list_mut().reorder(&ids, LOCAL_CLIENT)?;
        self.save(&list).await
    }

    pub async fn move_item(&self, user_id: i64, id: i64, item_id: i64, position: usize) -> AppResult<MediaItem<T>> {
        let mut list = self.get_writable(user_id, id).await?;
        list.data
            .list_mut()
            .move_item(&item_id.to_string(), position, LOCAL_CLIENT)?;
        self.save(&list).await
    }

    pub async fn share(&self, user_id: i64, id: i64, with_user: i64, permission: Permission) -> AppResult<MediaItem<T>> {
        let mut list = self.get(user_id, id).await?;
        list.data.list_mut().share(user_id, with_user, permission)?;
        self.save(&list).await
    }

    pub async fn unshare(&self, user_id: i64, id: i64, with_user: i64) -> AppResult<MediaItem<T>> {
        let mut list = self.get(user_id, id).await?;
        list.data.list_mut().unshare(user_id, with_user)?;
        self.save(&list).await
    }

    pub async fn collaborators(&self, user_id: i64, id: i64) -> AppResult<Vec<ListCollaborator>> {
        let list = self.get(user_id, id).await?;
        Ok(list.data.list().shared_with.clone())
    }

    /// Pushes the list to each target client and pulls additions back.
    ///
    /// Additions on either side are merged. An item removed locally since
    /// the last sync is removed from the client too. The local order wins.
    /// Targets are independent: a failing target reports its error in its
    /// outcome and the others proceed.
    pub async fn sync(&self, user_id: i64, id: i64, client_ids: &[i64]) -> AppResult<Vec<SyncOutcome>> {
        let mut list = self.get_writable(user_id, id).await?;
        let mut outcomes = Vec::with_capacity(client_ids.len());

        for &client_id in client_ids {
            let mut outcome = SyncOutcome {
                client_id,
                ..Default::default()
            };
            if let Err(e) = self.sync_one(user_id, &mut list, client_id, &mut outcome).await {
                warn!(list = id, client = client_id, error = %e, "list sync failed");
                outcome.error = Some(e.to_string());
            }
            outcomes.push(outcome);
        }

        self.save(&list).await?;
        Ok(outcomes)
    }

    async fn sync_one(
        &self,
        user_id: i64,
        list: &mut MediaItem<T>,
        client_id: i64,
        outcome: &mut SyncOutcome,
    ) -> AppResult<()> {
        let provider = self.resolver.resolve(user_id, client_id, Some(T::CAPABILITY)).await?;
        let previous = list.data.list().sync_state(client_id).cloned();

        let (remote_id, remote_items) = self.remote_list(provider.as_ref(), list, previous.as_ref()).await?;
        outcome.client_list_id = Some(remote_id.clone());
        let pushed_before: HashSet<String> = previous
            .as_ref()
            .map(|s| s.items.iter().cloned().collect())
            .unwrap_or_default();
        let last_synced = previous.as_ref().map(|s| s.last_synced);
        if previous.as_ref().map(|s| s.client_list_id != remote_id).unwrap_or(true) {
            list.data.list_mut().set_sync_state(SyncClientState {
                client_id,
                client_list_id: remote_id.clone(),
                last_synced: last_synced.unwrap_or_else(Utc::now),
                items: Vec::new(),
            });
        }

        // pull: remote items we know locally, unless removed here since
        let mut local: Vec<String> = list.data.list().item_ids();
        for ext in &remote_items {
            if pushed_before.contains(ext) {
                continue;
            }
            let Some(internal) = self.index.find_by_client_item_id(client_id, ext).await? else {
                continue;
            };
            let internal = internal.to_string();
            if local.contains(&internal) {
                continue;
            }
            if last_synced
                .map(|since| list.data.list().removed_locally_since(&internal, since))
                .unwrap_or(false)
            {
                continue;
            }
            list.data.list_mut().add_item(&internal, client_id)?;
            local.push(internal);
            outcome.pulled += 1;
        }

        // translate local ids to this client's ids
        let ids: Vec<i64> = local.iter().filter_map(|s| s.parse().ok()).collect();
        let pairs = self.index.get_sync_clients(&ids).await?;
        let mut desired = Vec::with_capacity(ids.len());
        for id in &ids {
            match pairs.get(id).and_then(|p| p.get_item_id(client_id)) {
                Some(ext) if !desired.iter().any(|d| d == ext) => desired.push(ext.to_string()),
                Some(_) => {}
                None => outcome.skipped += 1,
            }
        }

        // what is on the remote list is recorded even when a push fails
        let mut current = remote_items;
        let pushed = self
            .push(provider.as_ref(), &remote_id, &desired, &pushed_before, &mut current, outcome)
            .await;
        let (items, last_synced) = match pushed {
            Ok(()) => (desired, Utc::now()),
            Err(_) => (
                current
                    .iter()
                    .filter(|c| desired.contains(*c) || pushed_before.contains(*c))
                    .cloned()
                    .collect(),
                last_synced.unwrap_or_else(Utc::now),
            ),
        };
        list.data.list_mut().set_sync_state(SyncClientState {
            client_id,
            client_list_id: remote_id,
            last_synced,
            items,
        });
        pushed?;

        info!(
            list = list.id,
            client = client_id,
            pushed = outcome.pushed,
            removed = outcome.removed,
            pulled = outcome.pulled,
            skipped = outcome.skipped,
            "synced list"
        );
        Ok(())
    }

    /// Removes stale items from the client's list, adds missing ones and
    /// reorders it to `desired`. `current` tracks the remote contents.
    async fn push(
        &self,
        provider: &dyn Provider,
        remote_id: &str,
        desired: &[String],
        pushed_before: &HashSet<String>,
        current: &mut Vec<String>,
        outcome: &mut SyncOutcome,
    ) -> AppResult<()> {
        let stale: Vec<String> = current
            .iter()
            .filter(|ext| pushed_before.contains(*ext) && !desired.contains(*ext))
            .cloned()
            .collect();
        for ext in &stale {
            T::remove_on(provider, remote_id, ext).await?;
            current.retain(|c| c != ext);
            outcome.removed += 1;
        }
        for ext in desired {
            if !current.contains(ext) {
                T::add_on(provider, remote_id, ext).await?;
                current.push(ext.clone());
                outcome.pushed += 1;
            }
        }

        // local order first, items unknown here keep their relative order
        let mut wanted = desired.to_vec();
        wanted.extend(current.iter().filter(|c| !desired.contains(*c)).cloned());
        if wanted != *current {
            match T::reorder_on(provider, remote_id, &wanted).await {
                Ok(()) => *current = wanted,
                Err(ProviderError::Unsupported(_)) => {
                    debug!(client = provider.client_id(), "client cannot reorder, keeping its order")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// The client's copy of the list, created if it does not exist (yet).
    async fn remote_list(
        &self,
        provider: &dyn Provider,
        list: &MediaItem<T>,
        state: Option<&SyncClientState>,
    ) -> AppResult<(String, Vec<String>)> {
        if let Some(state) = state {
            match T::fetch_one(provider, &state.client_list_id).await {
                Ok(remote) => return Ok((state.client_list_id.clone(), remote.data.list().item_ids())),
                Err(ProviderError::NotFound(_)) => {
                    info!(client = provider.client_id(), remote = %state.client_list_id, "remote list is gone, recreating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let details = list.data.details();
        let created = T::create_on(provider, &details.title, &details.description).await?;
        let remote_id = created
            .client_item_id(provider.client_id())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Provider(ProviderError::Api("created list has no id".to_string())))?;
        Ok((remote_id, created.data.list().item_ids()))
    }
}

fn internal_ids(list: &ListData) -> Vec<i64> {
    list.item_ids().iter().filter_map(|s| s.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::client::testing::FakeRegistry;
    use crate::client::{ClientConfig, ClientFactory, ClientSettings, ClientType};
    use crate::db::{ClientRepo, SqliteRepository};

    struct Fixture {
        repo: Arc<SqliteRepository>,
        registry: FakeRegistry,
        lists: ListService<Playlist>,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(SqliteRepository::in_memory().await.unwrap());
        let factory = Arc::new(ClientFactory::empty(reqwest::Client::new()));
        let registry = FakeRegistry::default();
        registry.install(&factory);
        let resolver = Arc::new(ClientResolver::new(repo.clone(), factory));
        let lists = ListService::new(repo.clone(), repo.clone(), resolver);
        Fixture { repo, registry, lists }
    }

    async fn movie(repo: &SqliteRepository, title: &str, pair: Option<(i64, &str)>) -> i64 {
        let mut item = MediaItem::new(Movie {
            details: Details::titled(title),
            ..Default::default()
        });
        if let Some((client, ext)) = pair {
            item.sync_clients.add_or_update(client, ClientType::Plex, ext);
        }
        MediaItemRepo::<Movie>::create(repo, &item).await.unwrap().id
    }

    fn order(list: &MediaItem<Playlist>) -> Vec<String> {
        list.data.list.item_ids()
    }

    #[tokio::test]
    async fn test_list_state_machine_persists() {
        let f = fixture().await;
        let a = movie(&f.repo, "a", None).await;
        let b = movie(&f.repo, "b", None).await;
        let c = movie(&f.repo, "c", None).await;

        let pl = f.lists.create(1, "mix", "", false).await.unwrap();
        for id in [a, b, c] {
            f.lists.add_item(1, pl.id, id).await.unwrap();
        }
        let pl = f.lists.reorder(1, pl.id, &[c, a, b]).await.unwrap();
        assert_eq!(order(&pl), vec![c.to_string(), a.to_string(), b.to_string()]);

        // wrong set leaves the stored list alone
        let err = f.lists.reorder(1, pl.id, &[c, a]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        let stored = f.lists.get(1, pl.id).await.unwrap();
        assert_eq!(order(&stored), order(&pl));

        // unknown media item
        assert!(matches!(f.lists.add_item(1, pl.id, 999).await, Err(AppError::NotFound(_))));

        let items = f.lists.get_items(1, pl.id).await.unwrap();
        assert_eq!(items.order, vec![c, a, b]);
        assert_eq!(items.movies.len(), 3);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let f = fixture().await;
        let a = movie(&f.repo, "a", None).await;
        let pl = f.lists.create(1, "mix", "", false).await.unwrap();

        let stale = f.lists.get(1, pl.id).await.unwrap();
        f.lists.add_item(1, pl.id, a).await.unwrap();
        let err = f.lists.save(&stale).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sharing_rules() {
        let f = fixture().await;
        let a = movie(&f.repo, "a", None).await;
        let pl = f.lists.create(1, "mine", "", false).await.unwrap();

        assert!(matches!(f.lists.get(2, pl.id).await, Err(AppError::PermissionDenied(_))));
        f.lists.share(1, pl.id, 2, Permission::Read).await.unwrap();
        assert!(f.lists.get(2, pl.id).await.is_ok());
        assert!(matches!(f.lists.add_item(2, pl.id, a).await, Err(AppError::PermissionDenied(_))));
        // only the owner may share
        assert!(matches!(
            f.lists.share(2, pl.id, 3, Permission::Read).await,
            Err(AppError::PermissionDenied(_))
        ));

        f.lists.share(1, pl.id, 2, Permission::Write).await.unwrap();
        f.lists.add_item(2, pl.id, a).await.unwrap();
        assert!(matches!(f.lists.delete(2, pl.id).await, Err(AppError::PermissionDenied(_))));

        f.lists.unshare(1, pl.id, 2).await.unwrap();
        assert!(f.lists.collaborators(1, pl.id).await.unwrap().is_empty());
        assert!(f.lists.delete(1, pl.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_sync_push_pull_and_local_removal() {
        let f = fixture().await;
        let settings = ClientSettings {
            base_url: "http://fake".to_string(),
            ..Default::default()
        };
        let plex = ClientRepo::create(&*f.repo, &ClientConfig::new(1, "plex", ClientType::Plex, settings))
            .await
            .unwrap()
            .id;
        let a = movie(&f.repo, "a", Some((plex, "ext-a"))).await;
        let b = movie(&f.repo, "b", Some((plex, "ext-b"))).await;
        let c = movie(&f.repo, "c", Some((plex, "ext-c"))).await;
        let unmapped = movie(&f.repo, "u", None).await;

        let pl = f.lists.create(1, "road trip", "", false).await.unwrap();
        for id in [a, b, unmapped] {
            f.lists.add_item(1, pl.id, id).await.unwrap();
        }

        let out = f.lists.sync(1, pl.id, &[plex]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].error, None);
        assert_eq!((out[0].pushed, out[0].skipped), (2, 1));
        let remote_id = out[0].client_list_id.clone().unwrap();
        let state = f.registry.state("plex");
        assert_eq!(state.playlist_items(&remote_id), vec!["ext-a", "ext-b"]);

        // an addition on the client comes back
        let mut with_c = state.playlist_items(&remote_id);
        with_c.insert(0, "ext-c".to_string());
        state.add_playlist(&remote_id, "road trip", &with_c.iter().map(|s| s.as_str()).collect::<Vec<_>>());

        // and a local removal goes out
        f.lists.remove_item(1, pl.id, a).await.unwrap();

        let out = f.lists.sync(1, pl.id, &[plex]).await.unwrap();
        assert_eq!((out[0].pulled, out[0].removed), (1, 1));
        assert_eq!(out[0].client_list_id.as_deref(), Some(remote_id.as_str()));

        let stored = f.lists.get(1, pl.id).await.unwrap();
        assert_eq!(order(&stored), vec![b.to_string(), unmapped.to_string(), c.to_string()]);
        // local order wins on the client
        assert_eq!(state.playlist_items(&remote_id), vec!["ext-b", "ext-c"]);
        assert_eq!(stored.data.list.sync_state(plex).unwrap().items, vec!["ext-b", "ext-c"]);
    }

    #[tokio::test]
    async fn test_failed_push_reuses_remote_list() {
        let f = fixture().await;
        let settings = ClientSettings {
            base_url: "http://fake".to_string(),
            ..Default::default()
        };
        let plex = ClientRepo::create(&*f.repo, &ClientConfig::new(1, "plex", ClientType::Plex, settings))
            .await
            .unwrap()
            .id;
        let a = movie(&f.repo, "a", Some((plex, "ext-a"))).await;
        let pl = f.lists.create(1, "mix", "", false).await.unwrap();
        f.lists.add_item(1, pl.id, a).await.unwrap();

        let state = f.registry.state("plex");
        state.set_failing_adds(true);
        let mut remote_ids = Vec::new();
        for _ in 0..3 {
            let out = f.lists.sync(1, pl.id, &[plex]).await.unwrap();
            assert!(out[0].error.is_some());
            remote_ids.push(out[0].client_list_id.clone().unwrap());
        }
        assert!(remote_ids.iter().all(|id| *id == remote_ids[0]));
        assert_eq!(state.playlist_count(), 1);

        state.set_failing_adds(false);
        let out = f.lists.sync(1, pl.id, &[plex]).await.unwrap();
        assert_eq!(out[0].error, None);
        assert_eq!(out[0].pushed, 1);
        assert_eq!(out[0].client_list_id.as_deref(), Some(remote_ids[0].as_str()));
        assert_eq!(state.playlist_items(&remote_ids[0]), vec!["ext-a"]);
        assert_eq!(state.playlist_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_failing_target_does_not_stop_others() {
        let f = fixture().await;
        let settings = ClientSettings {
            base_url: "http://fake".to_string(),
            ..Default::default()
        };
        let good = ClientRepo::create(&*f.repo, &ClientConfig::new(1, "good", ClientType::Plex, settings.clone()))
            .await
            .unwrap()
            .id;
        let bad = ClientRepo::create(&*f.repo, &ClientConfig::new(1, "bad", ClientType::Jellyfin, settings))
            .await
            .unwrap()
            .id;
        f.registry.state("bad").set_failing(true);
        let a = movie(&f.repo, "a", Some((good, "g-a"))).await;

        let pl = f.lists.create(1, "mix", "", false).await.unwrap();
        f.lists.add_item(1, pl.id, a).await.unwrap();

        let out = f.lists.sync(1, pl.id, &[bad, good, 4242]).await.unwrap();
        assert!(out[0].error.is_some());
        assert_eq!(out[1].error, None);
        assert_eq!(out[1].pushed, 1);
        assert!(out[2].error.is_some());

        let stored = f.lists.get(1, pl.id).await.unwrap();
        assert!(stored.data.list.sync_state(good).is_some());
        assert!(stored.data.list.sync_state(bad).is_none());
    }
}
