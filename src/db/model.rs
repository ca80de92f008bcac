use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{ClientConfig, ClientSettings, ClientType};
use crate::media::{MediaData, MediaItem, MediaType, SyncClients};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// bcrypt hash.
    #[serde(skip_serializing)]
    pub password: String,
    pub created: Option<String>,
    pub lastlogin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub userid: i64,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    pub lastused: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccessTokenRow {
    pub token: String,
    pub userid: i64,
    pub created: String,
    pub expires: Option<String>,
    pub lastused: Option<String>,
}

impl From<AccessTokenRow> for AccessToken {
    fn from(row: AccessTokenRow) -> Self {
        AccessToken {
            token: row.token,
            userid: row.userid,
            created: parse_ts(&row.created),
            expires: row.expires.as_deref().map(parse_ts),
            lastused: row.lastused.as_deref().map(parse_ts),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub client_type: String,
    pub enabled: bool,
    pub settings: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<ClientRow> for ClientConfig {
    type Error = DbError;

    fn try_from(row: ClientRow) -> Result<Self, Self::Error> {
        let client_type = ClientType::from_str(&row.client_type)
            .ok_or_else(|| DbError::Serialization(format!("unknown client type {}", row.client_type)))?;
        let settings: ClientSettings = serde_json::from_str(&row.settings)?;
        Ok(ClientConfig {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            client_type,
            enabled: row.enabled,
            settings,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaItemRow {
    pub id: i64,
    pub media_type: String,
    pub owner_id: Option<i64>,
    pub version: i64,
    pub data: String,
    pub sync_clients: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MediaItemRow {
    pub fn media_type(&self) -> DbResult<MediaType> {
        MediaType::from_str(&self.media_type)
            .ok_or_else(|| DbError::Serialization(format!("unknown media type {}", self.media_type)))
    }

    /// Decodes the row, refusing rows stored under another media type.
    pub fn decode<T: MediaData>(self) -> DbResult<MediaItem<T>> {
        let media_type = self.media_type()?;
        if media_type != T::MEDIA_TYPE {
            return Err(DbError::Serialization(format!(
                "item {} is a {}, not a {}",
                self.id,
                media_type,
                T::MEDIA_TYPE
            )));
        }
        let data: T = serde_json::from_str(&self.data)?;
        let mut sync_clients: SyncClients = serde_json::from_str(&self.sync_clients)?;
        sync_clients.dedup();
        Ok(MediaItem {
            id: self.id,
            media_type,
            sync_clients,
            owner_id: self.owner_id,
            version: self.version,
            data,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
        })
    }
}

/// Per-user overlay on a media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMediaItemData {
    pub id: i64,
    pub user_id: i64,
    pub media_item_id: i64,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub play_count: i64,
    pub position_seconds: i64,
    pub duration_seconds: i64,
    pub completed: bool,
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_played_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserMediaItemData {
    pub fn new(user_id: i64, media_item_id: i64, media_type: MediaType) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            media_item_id,
            media_type,
            play_count: 0,
            position_seconds: 0,
            duration_seconds: 0,
            completed: false,
            is_favorite: false,
            rating: None,
            played_at: None,
            last_played_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserDataRow {
    pub id: i64,
    pub user_id: i64,
    pub media_item_id: i64,
    pub media_type: String,
    pub play_count: i64,
    pub position_seconds: i64,
    pub duration_seconds: i64,
    pub completed: bool,
    pub is_favorite: bool,
    pub rating: Option<f64>,
    pub played_at: Option<String>,
    pub last_played_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<UserDataRow> for UserMediaItemData {
    type Error = DbError;

    fn try_from(row: UserDataRow) -> Result<Self, Self::Error> {
        let media_type = MediaType::from_str(&row.media_type)
            .ok_or_else(|| DbError::Serialization(format!("unknown media type {}", row.media_type)))?;
        Ok(UserMediaItemData {
            id: row.id,
            user_id: row.user_id,
            media_item_id: row.media_item_id,
            media_type,
            play_count: row.play_count,
            position_seconds: row.position_seconds,
            duration_seconds: row.duration_seconds,
            completed: row.completed,
            is_favorite: row.is_favorite,
            rating: row.rating.map(|r| r as f32),
            played_at: row.played_at.as_deref().map(parse_ts),
            last_played_at: row.last_played_at.as_deref().map(parse_ts),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        })
    }
}

/// Fixed-width UTC timestamps so that text comparison in SQL orders them.
pub fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
