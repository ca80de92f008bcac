use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{Capability, ClientResolver, WatchHistoryEntry};
use crate::db::{DbError, MediaIndexRepo, UserDataRepo, UserMediaItemData};
use crate::error::{AppError, AppResult};
use crate::media::{MediaType, QueryOptions};

use super::aggregate::FanOut;

/// Fraction of the duration after which an item counts as watched.
const COMPLETED_RATIO: f64 = 0.9;

pub const MAX_RATING: f32 = 5.0;

/// A playback report.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    pub media_item_id: i64,
    #[serde(default)]
    pub position_seconds: i64,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub completed: bool,
}

/// Per-user overlay: play state, favorites, ratings.
pub struct UserDataService {
    repo: Arc<dyn UserDataRepo>,
    index: Arc<dyn MediaIndexRepo>,
    resolver: Arc<ClientResolver>,
    fan_out: FanOut,
    shutdown: CancellationToken,
}

impl UserDataService {
    pub fn new(
        repo: Arc<dyn UserDataRepo>,
        index: Arc<dyn MediaIndexRepo>,
        resolver: Arc<ClientResolver>,
        fan_out: FanOut,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repo,
            index,
            resolver,
            fan_out,
            shutdown,
        }
    }

    /// The existing record, or a fresh one for a known media item.
    async fn load_or_new(&self, user_id: i64, media_item_id: i64) -> AppResult<UserMediaItemData> {
        match self.repo.get(user_id, media_item_id).await {
            Ok(data) => Ok(data),
            Err(DbError::NotFound(_)) => {
                let media_type = self.index.get_media_type(media_item_id).await?;
                Ok(UserMediaItemData::new(user_id, media_item_id, media_type))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn record_play(&self, user_id: i64, event: PlayEvent) -> AppResult<UserMediaItemData> {
        if event.position_seconds < 0 || event.duration_seconds.map(|d| d < 0).unwrap_or(false) {
            return Err(AppError::InvalidArgument("position and duration must not be negative".to_string()));
        }
        let mut data = self.load_or_new(user_id, event.media_item_id).await?;
        let now = Utc::now();

        data.play_count += 1;
        data.position_seconds = event.position_seconds;
        if let Some(duration) = event.duration_seconds {
            data.duration_seconds = duration;
        }
        let watched = data.duration_seconds > 0
            && data.position_seconds as f64 >= data.duration_seconds as f64 * COMPLETED_RATIO;
        data.completed = event.completed || watched;
        if data.completed {
            data.played_at = Some(now);
        }
        data.last_played_at = Some(now);

        debug!(
            user = user_id,
            item = event.media_item_id,
            position = data.position_seconds,
            completed = data.completed,
            "recorded play"
        );
        Ok(self.repo.upsert(&data).await?)
    }

    /// Idempotent: setting the same state twice is the same as once.
    pub async fn toggle_favorite(&self, media_item_id: i64, user_id: i64, favorite: bool) -> AppResult<UserMediaItemData> {
        let mut data = self.load_or_new(user_id, media_item_id).await?;
        data.is_favorite = favorite;
        Ok(self.repo.upsert(&data).await?)
    }

    /// Ratings are on a 0-5 scale; anything else is rejected untouched.
    pub async fn update_rating(&self, media_item_id: i64, user_id: i64, rating: f32) -> AppResult<UserMediaItemData> {
        if !rating.is_finite() || !(0.0..=MAX_RATING).contains(&rating) {
            return Err(AppError::InvalidArgument(format!(
                "rating must be between 0 and {}, got {}",
                MAX_RATING, rating
            )));
        }
        let mut data = self.load_or_new(user_id, media_item_id).await?;
        data.rating = Some(rating);
        Ok(self.repo.upsert(&data).await?)
    }

    pub async fn get_by_id(&self, user_id: i64, id: i64) -> AppResult<UserMediaItemData> {
        let data = self.repo.get_by_id(id).await?;
        if data.user_id != user_id {
            return Err(AppError::PermissionDenied(format!("user data {} belongs to another user", id)));
        }
        Ok(data)
    }

    pub async fn get(&self, user_id: i64, media_item_id: i64) -> AppResult<UserMediaItemData> {
        Ok(self.repo.get(user_id, media_item_id).await?)
    }

    pub async fn get_continue_watching(&self, user_id: i64, limit: usize) -> AppResult<Vec<UserMediaItemData>> {
        Ok(self.repo.get_continue_watching(user_id, limit).await?)
    }

    pub async fn get_user_history(
        &self,
        user_id: i64,
        media_type: Option<MediaType>,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<UserMediaItemData>> {
        Ok(self.repo.get_history(user_id, media_type, limit, offset).await?)
    }

    pub async fn get_recent_history(&self, user_id: i64, days: i64) -> AppResult<Vec<UserMediaItemData>> {
        if days <= 0 {
            return Err(AppError::InvalidArgument("days must be positive".to_string()));
        }
        let since = chrono::Duration::try_days(days)
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .ok_or_else(|| AppError::InvalidArgument(format!("{} days is out of range", days)))?;
        Ok(self.repo.get_played_since(user_id, since).await?)
    }

    /// Play history as the user's media servers report it, newest first.
    /// Clients that fail are left out.
    pub async fn get_client_history(
        &self,
        user_id: i64,
        media_type: Option<MediaType>,
        limit: usize,
    ) -> AppResult<Vec<WatchHistoryEntry>> {
        let providers = self.resolver.resolve_all(user_id, Capability::History).await?;
        debug!(user = user_id, clients = providers.len(), "client play history");

        // with a type filter the per-client page could be all other types
        let options = QueryOptions {
            limit: media_type.is_none().then_some(limit),
            ..Default::default()
        };
        let mut entries = self
            .fan_out
            .run(providers, &self.shutdown, move |provider| {
                let options = options.clone();
                async move { provider.get_play_history(&options).await }
            })
            .await;
        if let Some(kind) = media_type {
            entries.retain(|e| e.media_type == kind);
        }
        entries.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn get_favorites(&self, user_id: i64, media_type: Option<MediaType>) -> AppResult<Vec<UserMediaItemData>> {
        Ok(self.repo.get_favorites(user_id, media_type).await?)
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> AppResult<()> {
        self.get_by_id(user_id, id).await?;
        Ok(self.repo.delete(id).await?)
    }

    /// Resets play state for every item; favorites and ratings are kept.
    pub async fn clear_user_history(&self, user_id: i64) -> AppResult<u64> {
        Ok(self.repo.clear_history(user_id).await?)
    }
}
