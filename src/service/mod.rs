pub mod aggregate;
pub mod client_lists;
pub mod clients;
pub mod lists;
pub mod media;
pub mod userdata;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::{ClientFactory, ClientList, ClientResolver, Fetchable};
use crate::config::AggregationConfig;
use crate::db::SqliteRepository;
use crate::media::{Album, Artist, Collection, Movie, Playlist, Series, Track};

pub use aggregate::FanOut;
pub use client_lists::ClientListService;
pub use clients::{ClientService, CreateClientRequest, UpdateClientRequest};
pub use lists::{ListService, ListUpdate, SyncOutcome};
pub use media::{MediaService, WithUserData};
pub use userdata::{PlayEvent, UserDataService};

/// Every service, wired to one repository and one adapter cache.
pub struct Services {
    pub resolver: Arc<ClientResolver>,
    pub clients: ClientService,
    pub movies: MediaService<Movie>,
    pub series: MediaService<Series>,
    pub tracks: MediaService<Track>,
    pub albums: MediaService<Album>,
    pub artists: MediaService<Artist>,
    pub playlists: ListService<Playlist>,
    pub collections: ListService<Collection>,
    pub client_playlists: ClientListService<Playlist>,
    pub client_collections: ClientListService<Collection>,
    pub user_data: UserDataService,
}

impl Services {
    pub fn new(
        db: Arc<SqliteRepository>,
        factory: Arc<ClientFactory>,
        aggregation: &AggregationConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let resolver = Arc::new(ClientResolver::new(db.clone(), factory));
        let fan_out = FanOut::from_config(aggregation);

        macro_rules! media {
            ($ty:ty) => {
                MediaService::<$ty>::new(
                    resolver.clone(),
                    db.clone(),
                    db.clone(),
                    db.clone(),
                    fan_out.clone(),
                    shutdown.clone(),
                )
            };
        }

        Self {
            clients: ClientService::new(db.clone(), resolver.clone()),
            movies: media!(Movie),
            series: media!(Series),
            tracks: media!(Track),
            albums: media!(Album),
            artists: media!(Artist),
            playlists: ListService::<Playlist>::new(db.clone(), db.clone(), resolver.clone()),
            collections: ListService::<Collection>::new(db.clone(), db.clone(), resolver.clone()),
            client_playlists: ClientListService::<Playlist>::new(resolver.clone(), fan_out.clone(), shutdown.clone()),
            client_collections: ClientListService::<Collection>::new(resolver.clone(), fan_out.clone(), shutdown.clone()),
            user_data: UserDataService::new(db.clone(), db, resolver.clone(), fan_out, shutdown),
            resolver,
        }
    }
}

/// Maps a payload type to its aggregation service.
pub trait Domain: Fetchable {
    fn service(services: &Services) -> &MediaService<Self>;
}

/// Maps a list payload type to its local and per-client list services.
pub trait ListDomain: ClientList {
    fn lists(services: &Services) -> &ListService<Self>;
    fn client_lists(services: &Services) -> &ClientListService<Self>;
}

macro_rules! domain {
    ($($ty:ty => $field:ident;)*) => {
        $(
            impl Domain for $ty {
                fn service(services: &Services) -> &MediaService<Self> {
                    &services.$field
                }
            }
        )*
    };
}

domain! {
    Movie => movies;
    Series => series;
    Track => tracks;
    Album => albums;
    Artist => artists;
}

impl ListDomain for Playlist {
    fn lists(services: &Services) -> &ListService<Self> {
        &services.playlists
    }
    fn client_lists(services: &Services) -> &ClientListService<Self> {
        &services.client_playlists
    }
}

impl ListDomain for Collection {
    fn lists(services: &Services) -> &ListService<Self> {
        &services.collections
    }
    fn client_lists(services: &Services) -> &ClientListService<Self> {
        &services.client_collections
    }
}
