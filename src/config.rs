use std::path::PathBuf;
use std::time::Duration;

use crate::errors::StorefrontError;

/// Storefront client options. Pass this into `Storefront::new()`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL of the REST API, including the `/api` prefix.
    pub api_url: String,
    /// Origin of the push-channel server (Socket.IO endpoint lives under it).
    pub socket_url: String,
    /// File the session token is persisted to.
    pub token_path: PathBuf,
    /// Whether the client should print debug statements.
    pub debug: bool,
    /// Fixed delay before the push channel reconnects after a transport error.
    pub reconnect_delay: Duration,
    /// Items per page for paginated listings.
    pub page_size: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            socket_url: "http://localhost:5000".to_string(),
            token_path: default_token_path(),
            debug: false,
            reconnect_delay: Duration::from_secs(5),
            page_size: 5,
        }
    }
}

impl ClientOptions {
    /// Defaults overridden by `STOREFRONT_API_URL`, `STOREFRONT_SOCKET_URL`,
    /// `STOREFRONT_TOKEN_PATH` and `STOREFRONT_DEBUG`.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(url) = std::env::var("STOREFRONT_API_URL") {
            options.api_url = url;
        }
        if let Ok(url) = std::env::var("STOREFRONT_SOCKET_URL") {
            options.socket_url = url;
        }
        if let Ok(path) = std::env::var("STOREFRONT_TOKEN_PATH") {
            options.token_path = PathBuf::from(path);
        }
        if let Ok(flag) = std::env::var("STOREFRONT_DEBUG") {
            options.debug = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        options
    }

    /// Check that the options are usable before anything is built from them.
    pub fn validate(&self) -> Result<(), StorefrontError> {
        for (name, url) in [("api_url", &self.api_url), ("socket_url", &self.socket_url)] {
            reqwest::Url::parse(url)
                .map_err(|e| StorefrontError::Config(format!("{} `{}`: {}", name, url, e)))?;
        }

        if self.page_size == 0 {
            return Err(StorefrontError::Config("page_size must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// `~/.storefront/token`, falling back to the working directory.
fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".storefront").join("token")
}
