use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::item::{MediaData, MediaType};
use super::list::ListData;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmdb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tvdb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub musicbrainz: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backdrop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Metadata shared by every payload type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub studios: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_rating: Option<String>,
    /// Duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default)]
    pub artwork: Artwork,
    #[serde(default)]
    pub external_ids: ExternalIds,
    /// Rating on a 0-10 scale as reported by the provider's community.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_rating: Option<f32>,
    /// The provider account's own rating, 0-10.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<f32>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Details {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Sets both the date and the derived year.
    pub fn set_release_date(&mut self, date: Option<NaiveDate>) {
        use chrono::Datelike;
        if let Some(d) = date {
            self.release_year = Some(d.year());
        }
        self.release_date = date;
    }

    /// Parses `YYYY-MM-DD` or a longer ISO-8601 timestamp.
    pub fn parse_date(s: &str) -> Option<NaiveDate> {
        let head = s.get(..10).unwrap_or(s);
        NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
    }

    /// Best rating available, user rating first.
    pub fn rating(&self) -> Option<f32> {
        self.user_rating.or(self.community_rating)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub details: Details,
    #[serde(default)]
    pub cast: Vec<Person>,
    #[serde(default)]
    pub crew: Vec<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailer_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub details: Details,
    #[serde(default)]
    pub season_count: i32,
    #[serde(default)]
    pub episode_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default)]
    pub cast: Vec<Person>,
    #[serde(default)]
    pub creators: Vec<Person>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    pub details: Details,
    #[serde(default)]
    pub series_id: String,
    pub number: i32,
    #[serde(default)]
    pub episode_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub details: Details,
    #[serde(default)]
    pub series_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
    pub season_number: i32,
    pub episode_number: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub details: Details,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub details: Details,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub track_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub details: Details,
    #[serde(default)]
    pub album_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub details: Details,
    pub list: ListData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub details: Details,
    pub list: ListData,
}

macro_rules! impl_media_data {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl MediaData for $ty {
                const MEDIA_TYPE: MediaType = $kind;

                fn details(&self) -> &Details {
                    &self.details
                }

                fn details_mut(&mut self) -> &mut Details {
                    &mut self.details
                }
            }
        )*
    };
}

impl_media_data! {
    Movie => MediaType::Movie,
    Series => MediaType::Series,
    Season => MediaType::Season,
    Episode => MediaType::Episode,
    Track => MediaType::Track,
    Album => MediaType::Album,
    Artist => MediaType::Artist,
    Playlist => MediaType::Playlist,
    Collection => MediaType::Collection,
}

/// Payloads that wrap an ordered [`ListData`].
pub trait ListPayload: MediaData {
    fn new_list(details: Details, list: ListData) -> Self;
    fn list(&self) -> &ListData;
    fn list_mut(&mut self) -> &mut ListData;
}

impl ListPayload for Playlist {
    fn new_list(details: Details, list: ListData) -> Self {
        Self { details, list }
    }

    fn list(&self) -> &ListData {
        &self.list
    }

    fn list_mut(&mut self) -> &mut ListData {
        &mut self.list
    }
}

impl ListPayload for Collection {
    fn new_list(details: Details, list: ListData) -> Self {
        Self { details, list }
    }

    fn list(&self) -> &ListData {
        &self.list
    }

    fn list_mut(&mut self) -> &mut ListData {
        &mut self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_variants() {
        assert_eq!(
            Details::parse_date("1999-03-31"),
            NaiveDate::from_ymd_opt(1999, 3, 31)
        );
        assert_eq!(
            Details::parse_date("1999-03-31T00:00:00.0000000Z"),
            NaiveDate::from_ymd_opt(1999, 3, 31)
        );
        assert_eq!(Details::parse_date("soon"), None);
    }

    #[test]
    fn test_release_date_sets_year() {
        let mut d = Details::titled("The Matrix");
        d.set_release_date(Details::parse_date("1999-03-31"));
        assert_eq!(d.release_year, Some(1999));
    }

    #[test]
    fn test_rating_prefers_user() {
        let mut d = Details::titled("x");
        d.community_rating = Some(7.0);
        assert_eq!(d.rating(), Some(7.0));
        d.user_rating = Some(9.0);
        assert_eq!(d.rating(), Some(9.0));
    }
}
