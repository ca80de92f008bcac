pub mod item;
pub mod list;
pub mod payload;
pub mod query;

pub use item::*;
pub use list::*;
pub use payload::*;
pub use query::*;

use serde::Serialize;

/// Items of mixed types, as referenced by a list.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemList {
    pub movies: Vec<MediaItem<Movie>>,
    pub series: Vec<MediaItem<Series>>,
    pub seasons: Vec<MediaItem<Season>>,
    pub episodes: Vec<MediaItem<Episode>>,
    pub tracks: Vec<MediaItem<Track>>,
    pub albums: Vec<MediaItem<Album>>,
    pub artists: Vec<MediaItem<Artist>>,
    pub playlists: Vec<MediaItem<Playlist>>,
    pub collections: Vec<MediaItem<Collection>>,
    /// Internal ids in list order, for clients that render the original order.
    pub order: Vec<i64>,
}

impl MediaItemList {
    pub fn len(&self) -> usize {
        self.movies.len()
            + self.series.len()
            + self.seasons.len()
            + self.episodes.len()
            + self.tracks.len()
            + self.albums.len()
            + self.artists.len()
            + self.playlists.len()
            + self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: i64) -> bool {
        fn has<T>(v: &[MediaItem<T>], id: i64) -> bool {
            v.iter().any(|i| i.id == id)
        }
        has(&self.movies, id)
            || has(&self.series, id)
            || has(&self.seasons, id)
            || has(&self.episodes, id)
            || has(&self.tracks, id)
            || has(&self.albums, id)
            || has(&self.artists, id)
            || has(&self.playlists, id)
            || has(&self.collections, id)
    }
}
