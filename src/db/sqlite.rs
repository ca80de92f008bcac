use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::client::{ClientCategory, ClientConfig};
use crate::media::*;

use super::model::*;
use super::repo::*;

const ITEM_COLUMNS: &str =
    "m.id, m.media_type, m.owner_id, m.version, m.data, m.sync_clients, m.created_at, m.updated_at";

const CLIENT_COLUMNS: &str = "id, user_id, name, client_type, enabled, settings, created_at, updated_at";

const USERDATA_COLUMNS: &str = "id, user_id, media_item_id, media_type, play_count, position_seconds, \
     duration_seconds, completed, is_favorite, rating, played_at, last_played_at, created_at, updated_at";

pub struct SqliteRepository {
    pool: SqlitePool,
    token_cache: Arc<RwLock<HashMap<String, AccessToken>>>,
}

fn not_found(what: String) -> impl FnOnce(sqlx::Error) -> DbError {
    move |e| match e {
        sqlx::Error::RowNotFound => DbError::NotFound(what),
        _ => DbError::Sqlx(e),
    }
}

fn already_exists(what: String) -> impl FnOnce(sqlx::Error) -> DbError {
    move |e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => DbError::AlreadyExists(what),
        _ => DbError::Sqlx(e),
    }
}

impl SqliteRepository {
    pub async fn new(db_path: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(db_path)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let repo = Self::with_pool(pool).await?;
        info!("Database initialized at {}", db_path);
        Ok(repo)
    }

    /// A private in-memory database. A single connection that never
    /// expires, since each connection would otherwise get its own database.
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> DbResult<Self> {
        let repo = Self {
            pool,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> DbResult<()> {
        let schema = include_str!("schema.sql");
        sqlx::raw_sql(schema).execute(&self.pool).await?;
        Ok(())
    }

    pub fn start_background_tasks(self: Arc<Self>) {
        let repo_clone = Arc::clone(&self);
        tokio::spawn(async move {
            repo_clone.token_purge_loop().await;
        });
    }

    async fn token_purge_loop(&self) {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match self.purge_expired_tokens(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "purged expired access tokens"),
                Err(e) => error!("Failed to purge access tokens: {}", e),
            }
        }
    }

    pub async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> DbResult<u64> {
        {
            let mut cache = self.token_cache.write().await;
            cache.retain(|_, t| !t.is_expired(now));
        }
        let res = sqlx::query("DELETE FROM accesstokens WHERE expires IS NOT NULL AND expires <= ?")
            .bind(fmt_ts(&now))
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn write_sync_pairs(
        tx: &mut Transaction<'_, Sqlite>,
        media_item_id: i64,
        media_type: MediaType,
        sync_clients: &SyncClients,
    ) -> DbResult<()> {
        sqlx::query("DELETE FROM media_item_clients WHERE media_item_id = ?")
            .bind(media_item_id)
            .execute(&mut **tx)
            .await?;
        for pair in sync_clients.iter() {
            sqlx::query(
                "INSERT INTO media_item_clients (media_item_id, media_type, client_id, item_id) VALUES (?, ?, ?, ?)",
            )
            .bind(media_item_id)
            .bind(media_type.as_str())
            .bind(pair.client_id)
            .bind(&pair.item_id)
            .execute(&mut **tx)
            .await
            .map_err(already_exists(format!(
                "{} {} on client {} is already stored",
                media_type, pair.item_id, pair.client_id
            )))?;
        }
        Ok(())
    }

    async fn fetch_item_rows(&self, ids: &[i64], media_type: Option<MediaType>) -> DbResult<Vec<MediaItemRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM media_items m WHERE m.id IN (", ITEM_COLUMNS));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");
        if let Some(media_type) = media_type {
            qb.push(" AND m.media_type = ");
            qb.push_bind(media_type.as_str());
        }
        let rows = qb.build_query_as::<MediaItemRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn fetch_user_data(&self, sql: &str, user_id: i64) -> DbResult<Vec<UserMediaItemData>> {
        let rows = sqlx::query_as::<_, UserDataRow>(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(UserMediaItemData::try_from).collect()
    }
}

/// Orders `items` like `ids`, dropping ids that were not found.
/// LIMIT and OFFSET binds; SQLite reads a negative LIMIT as no limit.
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn in_id_order<T>(ids: &[i64], items: Vec<T>, id_of: impl Fn(&T) -> i64) -> Vec<T> {
    let mut by_id: HashMap<i64, T> = items.into_iter().map(|i| (id_of(&i), i)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[async_trait]
impl UserRepo for SqliteRepository {
    async fn get_user(&self, username: &str) -> DbResult<User> {
        sqlx::query_as::<_, User>("SELECT id, username, password, created, lastlogin FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("User not found: {}", username)))
    }

    async fn get_user_by_id(&self, id: i64) -> DbResult<User> {
        sqlx::query_as::<_, User>("SELECT id, username, password, created, lastlogin FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("User not found: {}", id)))
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> DbResult<User> {
        let created = fmt_ts(&Utc::now());
        let res = sqlx::query("INSERT INTO users (username, password, created) VALUES (?, ?, ?)")
            .bind(username)
            .bind(password_hash)
            .bind(&created)
            .execute(&self.pool)
            .await
            .map_err(already_exists(format!("User {} exists", username)))?;
        Ok(User {
            id: res.last_insert_rowid(),
            username: username.to_string(),
            password: password_hash.to_string(),
            created: Some(created),
            lastlogin: None,
        })
    }

    async fn update_last_login(&self, id: i64, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE users SET lastlogin = ? WHERE id = ?")
            .bind(fmt_ts(&at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccessTokenRepo for SqliteRepository {
    async fn get_token(&self, token: &str) -> DbResult<AccessToken> {
        {
            let cache = self.token_cache.read().await;
            if let Some(t) = cache.get(token) {
                return Ok(t.clone());
            }
        }

        let row = sqlx::query_as::<_, AccessTokenRow>(
            "SELECT token, userid, created, expires, lastused FROM accesstokens WHERE token = ?",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Token not found".to_string()))?;

        let access_token = AccessToken::from(row);
        let mut cache = self.token_cache.write().await;
        cache.insert(token.to_string(), access_token.clone());

        Ok(access_token)
    }

    async fn upsert_token(&self, token: &AccessToken) -> DbResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO accesstokens (token, userid, created, expires, lastused)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&token.token)
        .bind(token.userid)
        .bind(fmt_ts(&token.created))
        .bind(token.expires.as_ref().map(fmt_ts))
        .bind(token.lastused.as_ref().map(fmt_ts))
        .execute(&self.pool)
        .await?;

        let mut cache = self.token_cache.write().await;
        cache.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn delete_token(&self, token: &str) -> DbResult<()> {
        {
            let mut cache = self.token_cache.write().await;
            cache.remove(token);
        }

        sqlx::query("DELETE FROM accesstokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClientRepo for SqliteRepository {
    async fn get_by_id(&self, id: i64) -> DbResult<ClientConfig> {
        let row = sqlx::query_as::<_, ClientRow>(&format!("SELECT {} FROM clients WHERE id = ?", CLIENT_COLUMNS))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("client {}", id)))?;
        ClientConfig::try_from(row)
    }

    async fn get_by_user_id(&self, user_id: i64) -> DbResult<Vec<ClientConfig>> {
        let rows = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {} FROM clients WHERE user_id = ? OR user_id = ? ORDER BY id",
            CLIENT_COLUMNS
        ))
        .bind(user_id)
        .bind(crate::client::SYSTEM_USER)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ClientConfig::try_from).collect()
    }

    async fn get_by_category(&self, user_id: i64, category: ClientCategory) -> DbResult<Vec<ClientConfig>> {
        let rows = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {} FROM clients WHERE (user_id = ? OR user_id = ?) AND category = ? ORDER BY id",
            CLIENT_COLUMNS
        ))
        .bind(user_id)
        .bind(crate::client::SYSTEM_USER)
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ClientConfig::try_from).collect()
    }

    async fn create(&self, config: &ClientConfig) -> DbResult<ClientConfig> {
        let now = Utc::now();
        let settings = serde_json::to_string(&config.settings)?;
        let res = sqlx::query(
            "INSERT INTO clients (user_id, name, client_type, category, enabled, settings, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(config.user_id)
        .bind(&config.name)
        .bind(config.client_type.as_str())
        .bind(config.category().as_str())
        .bind(config.enabled)
        .bind(&settings)
        .bind(fmt_ts(&now))
        .bind(fmt_ts(&now))
        .execute(&self.pool)
        .await?;

        let mut created = config.clone();
        created.id = res.last_insert_rowid();
        created.created_at = now;
        created.updated_at = now;
        Ok(created)
    }

    async fn update(&self, config: &ClientConfig) -> DbResult<ClientConfig> {
        let now = Utc::now();
        let settings = serde_json::to_string(&config.settings)?;
        let res = sqlx::query(
            "UPDATE clients SET name = ?, client_type = ?, category = ?, enabled = ?, settings = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&config.name)
        .bind(config.client_type.as_str())
        .bind(config.category().as_str())
        .bind(config.enabled)
        .bind(&settings)
        .bind(fmt_ts(&now))
        .bind(config.id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("client {}", config.id)));
        }
        let mut updated = config.clone();
        updated.updated_at = now;
        Ok(updated)
    }

    async fn delete(&self, id: i64) -> DbResult<()> {
        let res = sqlx::query("DELETE FROM clients WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("client {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: MediaData> MediaItemRepo<T> for SqliteRepository {
    async fn get_by_id(&self, id: i64) -> DbResult<MediaItem<T>> {
        let row = sqlx::query_as::<_, MediaItemRow>(&format!(
            "SELECT {} FROM media_items m WHERE m.id = ? AND m.media_type = ?",
            ITEM_COLUMNS
        ))
        .bind(id)
        .bind(T::MEDIA_TYPE.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("{} {}", T::MEDIA_TYPE, id)))?;
        row.decode()
    }

    async fn get_by_ids(&self, ids: &[i64]) -> DbResult<Vec<MediaItem<T>>> {
        let rows = self.fetch_item_rows(ids, Some(T::MEDIA_TYPE)).await?;
        let items = rows
            .into_iter()
            .map(MediaItemRow::decode::<T>)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(in_id_order(ids, items, |i| i.id))
    }

    async fn get_by_client_item_id(&self, client_id: i64, item_id: &str) -> DbResult<MediaItem<T>> {
        let row = sqlx::query_as::<_, MediaItemRow>(&format!(
            "SELECT {} FROM media_items m
             JOIN media_item_clients c ON c.media_item_id = m.id
             WHERE c.media_type = ? AND c.client_id = ? AND c.item_id = ?",
            ITEM_COLUMNS
        ))
        .bind(T::MEDIA_TYPE.as_str())
        .bind(client_id)
        .bind(item_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("{} {} on client {}", T::MEDIA_TYPE, item_id, client_id)))?;
        row.decode()
    }

    async fn get_by_owner(&self, owner_id: i64) -> DbResult<Vec<MediaItem<T>>> {
        let rows = sqlx::query_as::<_, MediaItemRow>(&format!(
            "SELECT {} FROM media_items m WHERE m.media_type = ? AND m.owner_id = ? ORDER BY m.id",
            ITEM_COLUMNS
        ))
        .bind(T::MEDIA_TYPE.as_str())
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MediaItemRow::decode).collect()
    }

    async fn search(&self, options: &QueryOptions) -> DbResult<Vec<MediaItem<T>>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM media_items m WHERE m.media_type = ", ITEM_COLUMNS));
        qb.push_bind(T::MEDIA_TYPE.as_str());
        if let Some(owner_id) = options.owner_id {
            qb.push(" AND m.owner_id = ");
            qb.push_bind(owner_id);
        }
        if let Some(ref q) = options.query {
            qb.push(" AND m.title LIKE ");
            qb.push_bind(format!("%{}%", escape_like(q)));
            qb.push(" ESCAPE '\\'");
        }
        qb.push(" ORDER BY m.id");
        let rows = qb.build_query_as::<MediaItemRow>().fetch_all(&self.pool).await?;

        let mut items = rows
            .into_iter()
            .map(MediaItemRow::decode::<T>)
            .collect::<DbResult<Vec<_>>>()?;
        items.retain(|i| options.matches(i.data.details()));
        sort_and_paginate(&mut items, options);
        Ok(items)
    }

    async fn get_recent_items(&self, days: i64, limit: usize) -> DbResult<Vec<MediaItem<T>>> {
        let since = chrono::Duration::try_days(days)
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or_default();
        let rows = sqlx::query_as::<_, MediaItemRow>(&format!(
            "SELECT {} FROM media_items m WHERE m.media_type = ? AND m.created_at >= ?
             ORDER BY m.created_at DESC LIMIT ?",
            ITEM_COLUMNS
        ))
        .bind(T::MEDIA_TYPE.as_str())
        .bind(fmt_ts(&since))
        .bind(sql_count(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MediaItemRow::decode).collect()
    }

    async fn create(&self, item: &MediaItem<T>) -> DbResult<MediaItem<T>> {
        item.validate().map_err(|e| DbError::Serialization(e.to_string()))?;
        let now = Utc::now();
        let data = serde_json::to_string(&item.data)?;
        let sync_clients = serde_json::to_string(&item.sync_clients)?;

        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "INSERT INTO media_items (media_type, title, owner_id, version, data, sync_clients, created_at, updated_at)
             VALUES (?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(T::MEDIA_TYPE.as_str())
        .bind(item.title())
        .bind(item.owner_id)
        .bind(&data)
        .bind(&sync_clients)
        .bind(fmt_ts(&now))
        .bind(fmt_ts(&now))
        .execute(&mut *tx)
        .await?;
        let id = res.last_insert_rowid();
        Self::write_sync_pairs(&mut tx, id, T::MEDIA_TYPE, &item.sync_clients).await?;
        tx.commit().await?;

        let mut created = item.clone();
        created.id = id;
        created.version = 1;
        created.created_at = now;
        created.updated_at = now;
        Ok(created)
    }

    async fn update(&self, item: &MediaItem<T>) -> DbResult<MediaItem<T>> {
        item.validate().map_err(|e| DbError::Serialization(e.to_string()))?;
        let now = Utc::now();
        let data = serde_json::to_string(&item.data)?;
        let sync_clients = serde_json::to_string(&item.sync_clients)?;

        let mut tx = self.pool.begin().await?;
        let res = sqlx::query(
            "UPDATE media_items SET title = ?, owner_id = ?, data = ?, sync_clients = ?,
                version = version + 1, updated_at = ?
             WHERE id = ? AND media_type = ? AND version = ?",
        )
        .bind(item.title())
        .bind(item.owner_id)
        .bind(&data)
        .bind(&sync_clients)
        .bind(fmt_ts(&now))
        .bind(item.id)
        .bind(T::MEDIA_TYPE.as_str())
        .bind(item.version)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            let current = sqlx::query_as::<_, (i64,)>("SELECT version FROM media_items WHERE id = ? AND media_type = ?")
                .bind(item.id)
                .bind(T::MEDIA_TYPE.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match current {
                Some((version,)) => DbError::Conflict(format!(
                    "{} {} was modified (version {}, expected {})",
                    T::MEDIA_TYPE,
                    item.id,
                    version,
                    item.version
                )),
                None => DbError::NotFound(format!("{} {}", T::MEDIA_TYPE, item.id)),
            });
        }
        Self::write_sync_pairs(&mut tx, item.id, T::MEDIA_TYPE, &item.sync_clients).await?;
        tx.commit().await?;

        let mut updated = item.clone();
        updated.version = item.version + 1;
        updated.updated_at = now;
        Ok(updated)
    }

    async fn delete(&self, id: i64) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        let res = sqlx::query("DELETE FROM media_items WHERE id = ? AND media_type = ?")
            .bind(id)
            .bind(T::MEDIA_TYPE.as_str())
            .execute(&mut *tx)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("{} {}", T::MEDIA_TYPE, id)));
        }
        sqlx::query("DELETE FROM media_item_clients WHERE media_item_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MediaIndexRepo for SqliteRepository {
    async fn get_all_media_items_by_ids(&self, ids: &[i64]) -> DbResult<MediaItemList> {
        let rows = self.fetch_item_rows(ids, None).await?;
        let mut list = MediaItemList::default();
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            found.push(row.id);
            match row.media_type()? {
                MediaType::Movie => list.movies.push(row.decode()?),
                MediaType::Series => list.series.push(row.decode()?),
                MediaType::Season => list.seasons.push(row.decode()?),
                MediaType::Episode => list.episodes.push(row.decode()?),
                MediaType::Track => list.tracks.push(row.decode()?),
                MediaType::Album => list.albums.push(row.decode()?),
                MediaType::Artist => list.artists.push(row.decode()?),
                MediaType::Playlist => list.playlists.push(row.decode()?),
                MediaType::Collection => list.collections.push(row.decode()?),
            }
        }
        list.order = ids.iter().copied().filter(|id| found.contains(id)).collect();
        Ok(list)
    }

    async fn get_sync_clients(&self, ids: &[i64]) -> DbResult<HashMap<i64, SyncClients>> {
        let rows = self.fetch_item_rows(ids, None).await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let mut sync_clients: SyncClients = serde_json::from_str(&row.sync_clients)?;
            sync_clients.dedup();
            out.insert(row.id, sync_clients);
        }
        Ok(out)
    }

    async fn find_by_client_item_id(&self, client_id: i64, item_id: &str) -> DbResult<Option<i64>> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT media_item_id FROM media_item_clients WHERE client_id = ? AND item_id = ?
             ORDER BY media_item_id LIMIT 1",
        )
        .bind(client_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn get_media_type(&self, id: i64) -> DbResult<MediaType> {
        let (media_type,) = sqlx::query_as::<_, (String,)>("SELECT media_type FROM media_items WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found(format!("media item {}", id)))?;
        MediaType::from_str(&media_type)
            .ok_or_else(|| DbError::Serialization(format!("unknown media type {}", media_type)))
    }
}

#[async_trait]
impl UserDataRepo for SqliteRepository {
    async fn get_by_id(&self, id: i64) -> DbResult<UserMediaItemData> {
        let row = sqlx::query_as::<_, UserDataRow>(&format!(
            "SELECT {} FROM user_media_item_data WHERE id = ?",
            USERDATA_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("user data {}", id)))?;
        row.try_into()
    }

    async fn get(&self, user_id: i64, media_item_id: i64) -> DbResult<UserMediaItemData> {
        let row = sqlx::query_as::<_, UserDataRow>(&format!(
            "SELECT {} FROM user_media_item_data WHERE user_id = ? AND media_item_id = ?",
            USERDATA_COLUMNS
        ))
        .bind(user_id)
        .bind(media_item_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found(format!("user data for item {}", media_item_id)))?;
        row.try_into()
    }

    async fn get_many(&self, user_id: i64, media_item_ids: &[i64]) -> DbResult<Vec<UserMediaItemData>> {
        if media_item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM user_media_item_data WHERE user_id = ",
            USERDATA_COLUMNS
        ));
        qb.push_bind(user_id);
        qb.push(" AND media_item_id IN (");
        let mut sep = qb.separated(", ");
        for id in media_item_ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");
        let rows = qb.build_query_as::<UserDataRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(UserMediaItemData::try_from).collect()
    }

    async fn upsert(&self, data: &UserMediaItemData) -> DbResult<UserMediaItemData> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO user_media_item_data (user_id, media_item_id, media_type, play_count, position_seconds,
                duration_seconds, completed, is_favorite, rating, played_at, last_played_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id, media_item_id) DO UPDATE SET
                media_type = excluded.media_type,
                play_count = excluded.play_count,
                position_seconds = excluded.position_seconds,
                duration_seconds = excluded.duration_seconds,
                completed = excluded.completed,
                is_favorite = excluded.is_favorite,
                rating = excluded.rating,
                played_at = excluded.played_at,
                last_played_at = excluded.last_played_at,
                updated_at = excluded.updated_at",
        )
        .bind(data.user_id)
        .bind(data.media_item_id)
        .bind(data.media_type.as_str())
        .bind(data.play_count)
        .bind(data.position_seconds)
        .bind(data.duration_seconds)
        .bind(data.completed)
        .bind(data.is_favorite)
        .bind(data.rating.map(|r| r as f64))
        .bind(data.played_at.as_ref().map(fmt_ts))
        .bind(data.last_played_at.as_ref().map(fmt_ts))
        .bind(fmt_ts(&data.created_at))
        .bind(fmt_ts(&now))
        .execute(&self.pool)
        .await?;
        UserDataRepo::get(self, data.user_id, data.media_item_id).await
    }

    async fn get_continue_watching(&self, user_id: i64, limit: usize) -> DbResult<Vec<UserMediaItemData>> {
        let sql = format!(
            "SELECT {} FROM user_media_item_data
             WHERE user_id = ? AND completed = 0 AND position_seconds > 0
             ORDER BY last_played_at DESC LIMIT {}",
            USERDATA_COLUMNS, limit
        );
        self.fetch_user_data(&sql, user_id).await
    }

    async fn get_history(
        &self,
        user_id: i64,
        media_type: Option<MediaType>,
        limit: usize,
        offset: usize,
    ) -> DbResult<Vec<UserMediaItemData>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM user_media_item_data WHERE last_played_at IS NOT NULL AND user_id = ",
            USERDATA_COLUMNS
        ));
        qb.push_bind(user_id);
        if let Some(media_type) = media_type {
            qb.push(" AND media_type = ");
            qb.push_bind(media_type.as_str());
        }
        qb.push(" ORDER BY last_played_at DESC LIMIT ");
        qb.push_bind(sql_count(limit));
        qb.push(" OFFSET ");
        qb.push_bind(sql_count(offset));
        let rows = qb.build_query_as::<UserDataRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(UserMediaItemData::try_from).collect()
    }

    async fn get_played_since(&self, user_id: i64, since: DateTime<Utc>) -> DbResult<Vec<UserMediaItemData>> {
        let rows = sqlx::query_as::<_, UserDataRow>(&format!(
            "SELECT {} FROM user_media_item_data
             WHERE user_id = ? AND last_played_at >= ?
             ORDER BY last_played_at DESC",
            USERDATA_COLUMNS
        ))
        .bind(user_id)
        .bind(fmt_ts(&since))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UserMediaItemData::try_from).collect()
    }

    async fn get_favorites(&self, user_id: i64, media_type: Option<MediaType>) -> DbResult<Vec<UserMediaItemData>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM user_media_item_data WHERE is_favorite = 1 AND user_id = ",
            USERDATA_COLUMNS
        ));
        qb.push_bind(user_id);
        if let Some(media_type) = media_type {
            qb.push(" AND media_type = ");
            qb.push_bind(media_type.as_str());
        }
        qb.push(" ORDER BY updated_at DESC");
        let rows = qb.build_query_as::<UserDataRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(UserMediaItemData::try_from).collect()
    }

    async fn delete(&self, id: i64) -> DbResult<()> {
        let res = sqlx::query("DELETE FROM user_media_item_data WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("user data {}", id)));
        }
        Ok(())
    }

    /// Resets play state; favorites and ratings stay.
    async fn clear_history(&self, user_id: i64) -> DbResult<u64> {
        let res = sqlx::query(
            "UPDATE user_media_item_data SET play_count = 0, position_seconds = 0, completed = 0,
                played_at = NULL, last_played_at = NULL, updated_at = ?
             WHERE user_id = ? AND (play_count > 0 OR last_played_at IS NOT NULL)",
        )
        .bind(fmt_ts(&Utc::now()))
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
