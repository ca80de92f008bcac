use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: reqwest::StatusCode, url: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} not supported by this client")]
    Unsupported(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cancelled")]
    Cancelled,
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    pub fn unsupported(feature: &str) -> Self {
        Self::Unsupported(feature.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Network(format!("request timed out: {}", err));
        }
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ProviderError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Check HTTP response status before processing body.
pub fn check_response(resp: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::Auth(format!("{} for {}", status, resp.url())));
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProviderError::NotFound(resp.url().path().to_string()));
    }
    if status.is_client_error() || status.is_server_error() {
        return Err(ProviderError::Http {
            status,
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

/// Checks the status and decodes the JSON body.
pub async fn json_response<T: DeserializeOwned>(resp: reqwest::Response) -> ProviderResult<T> {
    let resp = check_response(resp)?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
