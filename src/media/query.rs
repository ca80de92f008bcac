use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::item::{MediaData, MediaItem};
use super::payload::{Details, Person};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    AddedAt,
    Rating,
    Popularity,
    Title,
    ReleaseYear,
}

impl SortField {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "addedat" | "added" | "dateadded" | "recent" => Some(SortField::AddedAt),
            "rating" | "toprated" => Some(SortField::Rating),
            "popularity" | "popular" => Some(SortField::Popularity),
            "title" | "name" => Some(SortField::Title),
            "releaseyear" | "year" => Some(SortField::ReleaseYear),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Some(SortOrder::Asc),
            "desc" | "descending" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Query parameters passed unchanged to every provider in a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub query: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub actor: Option<String>,
    pub creator: Option<String>,
    pub studio: Option<String>,
    pub min_rating: Option<f32>,
    pub max_rating: Option<f32>,
    pub sort: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub favorites: bool,
    pub recently_added: bool,
    pub external_source_id: Option<String>,
    pub owner_id: Option<i64>,
}

impl QueryOptions {
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, sort: SortField) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Number of items a single provider should return so that the merged
    /// result can still fill `offset + limit` after sorting.
    pub fn provider_limit(&self) -> Option<usize> {
        self.limit.map(|l| l.saturating_add(self.offset.unwrap_or(0)))
    }

    /// True when an actor or creator filter is set. `matches` cannot apply
    /// these since `Details` carries no people.
    pub fn filters_people(&self) -> bool {
        self.actor.is_some() || self.creator.is_some()
    }

    /// Person filter over the cast and creators of one item.
    pub fn matches_people(&self, cast: &[Person], creators: &[Person]) -> bool {
        let has = |people: &[Person], name: &str| people.iter().any(|p| p.name.eq_ignore_ascii_case(name));
        if let Some(ref actor) = self.actor {
            if !has(cast, actor) {
                return false;
            }
        }
        if let Some(ref creator) = self.creator {
            if !has(creators, creator) {
                return false;
            }
        }
        true
    }

    /// Client-side filter for the fields every payload shares. Providers use
    /// it for filters their API cannot express.
    pub fn matches(&self, details: &Details) -> bool {
        if let Some(ref q) = self.query {
            if !details.title.to_lowercase().contains(&q.to_lowercase()) {
                return false;
            }
        }
        if let Some(ref genre) = self.genre {
            if !details.genres.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                return false;
            }
        }
        if let Some(year) = self.year {
            if details.release_year != Some(year) {
                return false;
            }
        }
        if let Some(ref studio) = self.studio {
            if !details.studios.iter().any(|s| s.eq_ignore_ascii_case(studio)) {
                return false;
            }
        }
        if let Some(min) = self.min_rating {
            if details.rating().map(|r| r < min).unwrap_or(true) {
                return false;
            }
        }
        if let Some(max) = self.max_rating {
            if details.rating().map(|r| r > max).unwrap_or(true) {
                return false;
            }
        }
        if self.favorites && !details.is_favorite {
            return false;
        }
        true
    }
}

fn compare_opt<V: PartialOrd>(a: Option<V>, b: Option<V>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn compare_details(field: SortField, a: &Details, b: &Details) -> Ordering {
    match field {
        SortField::AddedAt => compare_opt(a.added_at, b.added_at),
        SortField::Rating => compare_opt(a.rating(), b.rating()),
        SortField::Popularity => compare_opt(a.popularity, b.popularity),
        SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        SortField::ReleaseYear => compare_opt(a.release_year, b.release_year),
    }
}

/// Stable sort by the requested field (descending unless asked otherwise),
/// then applies offset and limit. Equal keys keep their input order. Items
/// missing the sort key go last in descending order.
pub fn sort_and_paginate<T: MediaData>(items: &mut Vec<MediaItem<T>>, options: &QueryOptions) {
    let field = options.sort.unwrap_or_default();
    let order = options.sort_order.unwrap_or_default();
    items.sort_by(|a, b| {
        let ord = compare_details(field, a.data.details(), b.data.details());
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });

    let offset = options.offset.unwrap_or(0);
    if offset > 0 {
        let drain = offset.min(items.len());
        items.drain(..drain);
    }
    if let Some(limit) = options.limit {
        items.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientType;
    use crate::media::Movie;

    fn movie(client: i64, title: &str, rating: Option<f32>) -> MediaItem<Movie> {
        let mut m = Movie::default();
        m.details.title = title.to_string();
        m.details.community_rating = rating;
        MediaItem::from_client(client, ClientType::Jellyfin, title, m)
    }

    fn titles(items: &[MediaItem<Movie>]) -> Vec<&str> {
        items.iter().map(|i| i.title()).collect()
    }

    #[test]
    fn test_sort_desc_default_and_limit() {
        let mut items = vec![
            movie(1, "a", Some(5.0)),
            movie(1, "b", Some(9.0)),
            movie(2, "c", None),
            movie(2, "d", Some(7.0)),
        ];
        let opts = QueryOptions::default().with_sort(SortField::Rating).with_limit(3);
        sort_and_paginate(&mut items, &opts);
        assert_eq!(titles(&items), vec!["b", "d", "a"]);
    }

    #[test]
    fn test_ties_keep_provider_order() {
        let mut items = vec![
            movie(1, "first", Some(8.0)),
            movie(2, "second", Some(8.0)),
            movie(3, "third", Some(8.0)),
        ];
        let opts = QueryOptions::default().with_sort(SortField::Rating);
        sort_and_paginate(&mut items, &opts);
        assert_eq!(titles(&items), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_ascending_title_with_offset() {
        let mut items = vec![movie(1, "Charlie", None), movie(1, "alpha", None), movie(1, "Bravo", None)];
        let opts = QueryOptions {
            sort: Some(SortField::Title),
            sort_order: Some(SortOrder::Asc),
            offset: Some(1),
            ..Default::default()
        };
        sort_and_paginate(&mut items, &opts);
        assert_eq!(titles(&items), vec!["Bravo", "Charlie"]);
    }

    #[test]
    fn test_offset_past_end() {
        let mut items = vec![movie(1, "a", None)];
        let opts = QueryOptions {
            offset: Some(5),
            ..Default::default()
        };
        sort_and_paginate(&mut items, &opts);
        assert!(items.is_empty());
    }

    #[test]
    fn test_matches_filters() {
        let mut d = Details::titled("The Matrix");
        d.genres = vec!["Science Fiction".to_string()];
        d.release_year = Some(1999);
        d.community_rating = Some(8.7);

        assert!(QueryOptions::search("matrix").matches(&d));
        assert!(!QueryOptions::search("alien").matches(&d));
        let opts = QueryOptions {
            genre: Some("science fiction".to_string()),
            year: Some(1999),
            min_rating: Some(8.0),
            ..Default::default()
        };
        assert!(opts.matches(&d));
        let opts = QueryOptions {
            max_rating: Some(5.0),
            ..Default::default()
        };
        assert!(!opts.matches(&d));
    }

    #[test]
    fn test_provider_limit_saturates() {
        let opts = QueryOptions {
            limit: Some(usize::MAX),
            offset: Some(1),
            ..Default::default()
        };
        assert_eq!(opts.provider_limit(), Some(usize::MAX));
        let opts = QueryOptions::default().with_limit(10);
        assert_eq!(opts.provider_limit(), Some(10));
    }

    #[test]
    fn test_matches_people() {
        let person = |name: &str| Person {
            name: name.to_string(),
            role: None,
            character: None,
        };
        let cast = vec![person("Keanu Reeves")];
        let crew = vec![person("Lana Wachowski")];
        let opts = QueryOptions {
            actor: Some("keanu reeves".to_string()),
            ..Default::default()
        };
        assert!(opts.filters_people());
        assert!(opts.matches_people(&cast, &crew));
        assert!(!opts.matches_people(&crew, &cast));
        let opts = QueryOptions {
            creator: Some("Greta Gerwig".to_string()),
            ..Default::default()
        };
        assert!(!opts.matches_people(&cast, &crew));
        assert!(!QueryOptions::default().filters_people());
    }

    #[test]
    fn test_sort_field_parse() {
        assert_eq!(SortField::from_str("added_at"), Some(SortField::AddedAt));
        assert_eq!(SortField::from_str("Popularity"), Some(SortField::Popularity));
        assert_eq!(SortField::from_str("release-year"), Some(SortField::ReleaseYear));
        assert_eq!(SortField::from_str("random"), None);
    }
}
