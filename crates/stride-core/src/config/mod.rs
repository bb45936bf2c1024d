//! Runtime configuration for the sync engine and remote client.

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Default retry ceiling before an operation is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default broadcast capacity for queue/sync events
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Connection settings for the managed REST backend.
///
/// These are safe-to-ship public endpoint/key values plus the signed-in
/// user's access token. Secret service credentials never belong here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    rest_url: String,
    api_key: String,
    access_token: String,
}

impl RemoteConfig {
    /// Create a validated remote configuration
    pub fn new(
        rest_url: impl Into<String>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self> {
        let rest_url = normalize_text_option(Some(rest_url.into()))
            .ok_or_else(|| Error::InvalidInput("REST URL must not be empty".into()))?;
        if !is_http_url(&rest_url) {
            return Err(Error::InvalidInput(
                "REST URL must include http:// or https://".into(),
            ));
        }

        let api_key = normalize_text_option(Some(api_key.into()))
            .ok_or_else(|| Error::InvalidInput("API key must not be empty".into()))?;
        let access_token = normalize_text_option(Some(access_token.into()))
            .ok_or_else(|| Error::InvalidInput("Access token must not be empty".into()))?;

        Ok(Self {
            rest_url: rest_url.trim_end_matches('/').to_string(),
            api_key,
            access_token,
        })
    }

    /// Base REST URL with no trailing slash
    #[must_use]
    pub fn rest_url(&self) -> &str {
        &self.rest_url
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Display for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never echo credentials
        write!(f, "RemoteConfig({})", self.rest_url)
    }
}

/// Tunables for the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Failed attempts after which an operation is dead-lettered
    pub max_attempts: u32,
    /// Broadcast channel capacity for sync events
    pub event_capacity: usize,
    /// Whether the engine considers the network reachable at construction
    pub start_online: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            start_online: true,
        }
    }
}

impl EngineConfig {
    /// Set the retry ceiling
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Start in the offline state (a reconnect trigger flips it on)
    #[must_use]
    pub const fn starting_offline(mut self) -> Self {
        self.start_online = false;
        self
    }
}
