use serde::Deserialize;

use crate::error::AppError;
use crate::media::{MediaType, QueryOptions, SortField, SortOrder};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 500;
pub const MAX_OFFSET: usize = 10_000;
pub const MAX_DAYS: i64 = 3650;

fn bounded_limit(limit: Option<usize>) -> Result<usize, AppError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if limit > MAX_LIMIT {
        return Err(AppError::InvalidArgument(format!("limit must be at most {}", MAX_LIMIT)));
    }
    Ok(limit)
}

fn bounded_offset(offset: Option<usize>) -> Result<usize, AppError> {
    let offset = offset.unwrap_or(0);
    if offset > MAX_OFFSET {
        return Err(AppError::InvalidArgument(format!("offset must be at most {}", MAX_OFFSET)));
    }
    Ok(offset)
}

fn bounded_days(days: Option<i64>, default: i64) -> Result<i64, AppError> {
    let days = days.unwrap_or(default);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(AppError::InvalidArgument(format!("days must be between 1 and {}", MAX_DAYS)));
    }
    Ok(days)
}

/// Query string accepted by the search and listing endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(alias = "query")]
    pub q: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub actor: Option<String>,
    pub creator: Option<String>,
    pub studio: Option<String>,
    pub min_rating: Option<f32>,
    pub max_rating: Option<f32>,
    pub sort: Option<String>,
    pub sort_order: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub favorites: Option<bool>,
    pub recently_added: Option<bool>,
    /// Annotate results with the caller's user data.
    pub user_data: Option<bool>,
    pub days: Option<i64>,
}

impl SearchParams {
    pub fn options(&self) -> Result<QueryOptions, AppError> {
        let sort = match self.sort.as_deref() {
            Some(s) => Some(SortField::from_str(s).ok_or_else(|| AppError::InvalidArgument(format!("unknown sort field {}", s)))?),
            None => None,
        };
        let sort_order = match self.sort_order.as_deref() {
            Some(s) => Some(SortOrder::from_str(s).ok_or_else(|| AppError::InvalidArgument(format!("unknown sort order {}", s)))?),
            None => None,
        };
        if let (Some(min), Some(max)) = (self.min_rating, self.max_rating) {
            if min > max {
                return Err(AppError::InvalidArgument("minRating is above maxRating".to_string()));
            }
        }
        Ok(QueryOptions {
            query: self.q.clone().filter(|q| !q.trim().is_empty()),
            genre: self.genre.clone(),
            year: self.year,
            actor: self.actor.clone(),
            creator: self.creator.clone(),
            studio: self.studio.clone(),
            min_rating: self.min_rating,
            max_rating: self.max_rating,
            sort,
            sort_order,
            limit: Some(self.limit()?),
            offset: Some(bounded_offset(self.offset)?).filter(|o| *o > 0),
            favorites: self.favorites.unwrap_or(false),
            recently_added: self.recently_added.unwrap_or(false),
            external_source_id: None,
            owner_id: None,
        })
    }

    pub fn limit(&self) -> Result<usize, AppError> {
        bounded_limit(self.limit)
    }

    pub fn days(&self, default: i64) -> Result<i64, AppError> {
        bounded_days(self.days, default)
    }

    pub fn wants_user_data(&self) -> bool {
        self.user_data.unwrap_or(false)
    }
}

/// Query string for user data history endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub days: Option<i64>,
}

impl HistoryParams {
    pub fn limit(&self) -> Result<usize, AppError> {
        bounded_limit(self.limit)
    }

    pub fn offset(&self) -> Result<usize, AppError> {
        bounded_offset(self.offset)
    }

    pub fn days(&self, default: i64) -> Result<i64, AppError> {
        bounded_days(self.days, default)
    }

    pub fn media_type(&self) -> Result<Option<MediaType>, AppError> {
        match self.media_type.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => MediaType::from_str(s)
                .map(Some)
                .ok_or_else(|| AppError::InvalidArgument(format!("unknown media type {}", s))),
        }
    }
}
