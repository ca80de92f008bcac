use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User id that owns system-wide clients such as metadata providers.
pub const SYSTEM_USER: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Plex,
    Jellyfin,
    Emby,
    Subsonic,
    Tmdb,
    Radarr,
    Sonarr,
    Lidarr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientCategory {
    Media,
    Metadata,
    Automation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Movies,
    Series,
    Music,
    Playlists,
    Collections,
    History,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Movies => "movies",
            Capability::Series => "series",
            Capability::Music => "music",
            Capability::Playlists => "playlists",
            Capability::Collections => "collections",
            Capability::History => "history",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability predicates of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_movies: bool,
    pub supports_series: bool,
    pub supports_music: bool,
    pub supports_playlists: bool,
    pub supports_collections: bool,
    pub supports_history: bool,
}

impl Capabilities {
    pub fn of(caps: &[Capability]) -> Self {
        let mut c = Self::default();
        for cap in caps {
            c.set(*cap, true);
        }
        c
    }

    pub fn supports(&self, cap: Capability) -> bool {
        match cap {
            Capability::Movies => self.supports_movies,
            Capability::Series => self.supports_series,
            Capability::Music => self.supports_music,
            Capability::Playlists => self.supports_playlists,
            Capability::Collections => self.supports_collections,
            Capability::History => self.supports_history,
        }
    }

    pub fn set(&mut self, cap: Capability, on: bool) {
        match cap {
            Capability::Movies => self.supports_movies = on,
            Capability::Series => self.supports_series = on,
            Capability::Music => self.supports_music = on,
            Capability::Playlists => self.supports_playlists = on,
            Capability::Collections => self.supports_collections = on,
            Capability::History => self.supports_history = on,
        }
    }
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Plex => "plex",
            ClientType::Jellyfin => "jellyfin",
            ClientType::Emby => "emby",
            ClientType::Subsonic => "subsonic",
            ClientType::Tmdb => "tmdb",
            ClientType::Radarr => "radarr",
            ClientType::Sonarr => "sonarr",
            ClientType::Lidarr => "lidarr",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plex" => Some(ClientType::Plex),
            "jellyfin" => Some(ClientType::Jellyfin),
            "emby" => Some(ClientType::Emby),
            "subsonic" => Some(ClientType::Subsonic),
            "tmdb" => Some(ClientType::Tmdb),
            "radarr" => Some(ClientType::Radarr),
            "sonarr" => Some(ClientType::Sonarr),
            "lidarr" => Some(ClientType::Lidarr),
            _ => None,
        }
    }

    pub fn category(&self) -> ClientCategory {
        match self {
            ClientType::Plex | ClientType::Jellyfin | ClientType::Emby | ClientType::Subsonic => {
                ClientCategory::Media
            }
            ClientType::Tmdb => ClientCategory::Metadata,
            ClientType::Radarr | ClientType::Sonarr | ClientType::Lidarr => ClientCategory::Automation,
        }
    }

    /// What the vendor API can do at all.
    pub fn capabilities(&self) -> Capabilities {
        use Capability::*;
        match self {
            ClientType::Plex | ClientType::Jellyfin | ClientType::Emby => {
                Capabilities::of(&[Movies, Series, Music, Playlists, Collections, History])
            }
            ClientType::Subsonic => Capabilities::of(&[Music, Playlists]),
            ClientType::Tmdb => Capabilities::of(&[Movies, Series]),
            ClientType::Radarr => Capabilities::of(&[Movies]),
            ClientType::Sonarr => Capabilities::of(&[Series]),
            ClientType::Lidarr => Capabilities::of(&[Music]),
        }
    }
}

impl ClientCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientCategory::Media => "media",
            ClientCategory::Metadata => "metadata",
            ClientCategory::Automation => "automation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "media" => Some(ClientCategory::Media),
            "metadata" => Some(ClientCategory::Metadata),
            "automation" => Some(ClientCategory::Automation),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings; which fields are required depends on the type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// The account id on the vendor side, for servers that scope by user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub disabled_capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub client_type: ClientType,
    pub enabled: bool,
    pub settings: ClientSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClientConfig {
    pub fn new(user_id: i64, name: impl Into<String>, client_type: ClientType, settings: ClientSettings) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            name: name.into(),
            client_type,
            enabled: true,
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn category(&self) -> ClientCategory {
        self.client_type.category()
    }

    /// Vendor capabilities narrowed by the per-config disabled list.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = self.client_type.capabilities();
        for cap in &self.settings.disabled_capabilities {
            caps.set(*cap, false);
        }
        caps
    }

    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities().supports(cap)
    }

    pub fn is_visible_to(&self, user_id: i64) -> bool {
        self.user_id == user_id || self.user_id == SYSTEM_USER
    }

    /// Checks the settings the client type needs before any connection test.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("client name must not be empty".to_string());
        }
        let base_url = self.settings.base_url.trim();
        if !base_url.is_empty() || self.client_type != ClientType::Tmdb {
            let url = reqwest::Url::parse(base_url)
                .map_err(|e| format!("invalid base url {:?}: {}", base_url, e))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(format!("base url must be http or https, got {}", url.scheme()));
            }
        }

        let has = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        let s = &self.settings;
        match self.client_type {
            ClientType::Plex => {
                if !has(&s.token) {
                    return Err("plex requires a token".to_string());
                }
            }
            ClientType::Jellyfin | ClientType::Emby => {
                if !has(&s.api_key) {
                    return Err(format!("{} requires an api key", self.client_type));
                }
                if !has(&s.user_id) && !has(&s.username) {
                    return Err(format!("{} requires a user id or username", self.client_type));
                }
            }
            ClientType::Subsonic => {
                if !has(&s.username) || !has(&s.password) {
                    return Err("subsonic requires a username and password".to_string());
                }
            }
            ClientType::Tmdb | ClientType::Radarr | ClientType::Sonarr | ClientType::Lidarr => {
                if !has(&s.api_key) {
                    return Err(format!("{} requires an api key", self.client_type));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> ClientSettings {
        ClientSettings {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_capabilities_per_type() {
        assert!(ClientType::Plex.capabilities().supports(Capability::Collections));
        assert!(!ClientType::Subsonic.capabilities().supports(Capability::Movies));
        assert!(ClientType::Subsonic.capabilities().supports(Capability::Playlists));
        assert!(ClientType::Radarr.capabilities().supports(Capability::Movies));
        assert!(!ClientType::Radarr.capabilities().supports(Capability::Series));
        assert_eq!(ClientType::Tmdb.category(), ClientCategory::Metadata);
        assert_eq!(ClientType::Lidarr.category(), ClientCategory::Automation);
    }

    #[test]
    fn test_disabled_capabilities_narrow() {
        let mut s = settings("http://jf:8096");
        s.disabled_capabilities = vec![Capability::Music];
        let cfg = ClientConfig::new(1, "jf", ClientType::Jellyfin, s);
        assert!(cfg.supports(Capability::Movies));
        assert!(!cfg.supports(Capability::Music));
    }

    #[test]
    fn test_validate() {
        let mut s = settings("http://jf:8096");
        s.api_key = Some("key".to_string());
        let mut cfg = ClientConfig::new(1, "jf", ClientType::Jellyfin, s);
        assert!(cfg.validate().is_err());
        cfg.settings.username = Some("me".to_string());
        assert!(cfg.validate().is_ok());

        cfg.settings.base_url = "ftp://jf".to_string();
        assert!(cfg.validate().is_err());
        cfg.settings.base_url = "not a url".to_string();
        assert!(cfg.validate().is_err());

        let mut tmdb = ClientConfig::new(SYSTEM_USER, "tmdb", ClientType::Tmdb, settings(""));
        assert!(tmdb.validate().is_err());
        tmdb.settings.api_key = Some("k".to_string());
        assert!(tmdb.validate().is_ok());

        let blank = ClientConfig::new(1, " ", ClientType::Plex, settings("http://plex"));
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_system_clients_visible_to_everyone() {
        let cfg = ClientConfig::new(SYSTEM_USER, "tmdb", ClientType::Tmdb, settings(""));
        assert!(cfg.is_visible_to(42));
        let owned = ClientConfig::new(7, "plex", ClientType::Plex, settings("http://p"));
        assert!(owned.is_visible_to(7));
        assert!(!owned.is_visible_to(8));
    }
}
