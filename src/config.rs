use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub dbdir: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(skip)]
    pub debug_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default)]
    pub tlscert: Option<String>,
    #[serde(default)]
    pub tlskey: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: default_port(),
            tlscert: None,
            tlskey: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqliteConfig {
    pub filename: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Create an account on first login with an unknown username.
    #[serde(default)]
    pub autoregister: bool,
    #[serde(default = "default_token_lifetime_hours", alias = "tokenlifetime")]
    pub token_lifetime_hours: u64,
    /// bcrypt work factor for newly hashed passwords.
    #[serde(default = "default_password_cost")]
    pub password_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            autoregister: false,
            token_lifetime_hours: default_token_lifetime_hours(),
            password_cost: default_password_cost(),
        }
    }
}

impl AuthConfig {
    pub fn token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_lifetime_hours as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    #[serde(default = "default_max_concurrency", alias = "maxconcurrency")]
    pub max_concurrency: usize,
    /// Per-provider call timeout in seconds.
    #[serde(default = "default_call_timeout", alias = "calltimeout")]
    pub call_timeout: u64,
    /// Overall fan-out deadline in seconds.
    #[serde(default = "default_deadline")]
    pub deadline: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            call_timeout: default_call_timeout(),
            deadline: default_deadline(),
        }
    }
}

impl AggregationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// HTTP timeout in seconds for vendor requests.
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent", alias = "useragent")]
    pub user_agent: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub tmdb: Option<TmdbConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    #[serde(alias = "apikey")]
    pub api_key: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_port() -> String {
    "8090".to_string()
}

fn default_token_lifetime_hours() -> u64 {
    24 * 30
}

fn default_password_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_max_concurrency() -> usize {
    8
}

fn default_call_timeout() -> u64 {
    10
}

fn default_deadline() -> u64 {
    20
}

fn default_http_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("mediahub/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_string(), e))?;

        Self::from_yaml(&content).map_err(|e| ConfigError::ParseError(path.to_string(), e))
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn get_database_path(&self) -> Option<String> {
        if let Some(ref sqlite) = self.database.sqlite {
            return Some(sqlite.filename.clone());
        }

        if let Some(ref dbdir) = self.dbdir {
            let path = PathBuf::from(dbdir).join("mediahub.db");
            return Some(path.to_string_lossy().to_string());
        }

        None
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            dbdir: None,
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            aggregation: AggregationConfig::default(),
            providers: ProvidersConfig::default(),
            metadata: MetadataConfig::default(),
            debug_logs: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(String, std::io::Error),
    #[error("Failed to parse config file {0}: {1}")]
    ParseError(String, serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("listen:\n  port: \"9000\"\n").unwrap();
        assert_eq!(config.listen.port, "9000");
        assert_eq!(config.aggregation.max_concurrency, 8);
        assert_eq!(config.aggregation.call_timeout(), Duration::from_secs(10));
        assert!(!config.auth.autoregister);
        assert!(config.metadata.tmdb.is_none());
        assert!(config.get_database_path().is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
listen:
  address: 127.0.0.1
  port: "8443"
  tlscert: /etc/cert.pem
  tlskey: /etc/key.pem
dbdir: /var/lib/mediahub
auth:
  autoregister: true
  token_lifetime_hours: 12
aggregation:
  max_concurrency: 2
  call_timeout: 3
  deadline: 5
providers:
  timeout: 7
  user_agent: test-agent
metadata:
  tmdb:
    apikey: secret
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.listen.address.as_deref(), Some("127.0.0.1"));
        assert!(config.auth.autoregister);
        assert_eq!(config.auth.token_lifetime(), chrono::Duration::hours(12));
        assert_eq!(config.aggregation.deadline(), Duration::from_secs(5));
        assert_eq!(config.providers.user_agent, "test-agent");
        assert_eq!(config.metadata.tmdb.as_ref().unwrap().api_key, "secret");
        assert_eq!(
            config.get_database_path().as_deref(),
            Some("/var/lib/mediahub/mediahub.db")
        );
    }
}
