use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::LiveQueryError;

// =============================================================================
// Client config (figment-deserialized from defaults / live_query.toml / env vars)
// =============================================================================
//
// Equivalent ways to configure:
//
//   live_query.toml:  server_url = "https://example.com/parse"
//                     application_id = "myapp"
//
//   env var:          LIVE_QUERY_SERVER_URL=https://example.com/parse
//                     LIVE_QUERY_APPLICATION_ID=myapp

pub const CONFIG_FILE_NAME: &str = "live_query.toml";
pub const ENV_PREFIX: &str = "LIVE_QUERY_";

/// Where and as whom to connect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// HTTP(S) URL of the server; rewritten to its WebSocket equivalent.
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub client_key: Option<String>,
    /// Fixed session token, used when no provider is installed on the client.
    #[serde(default)]
    pub session_token: Option<String>,
    /// Replace the URL path, for servers that mount live queries on a fixed path.
    #[serde(default)]
    pub path: Option<String>,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            application_id: application_id.into(),
            ..Default::default()
        }
    }

    pub fn with_client_key(mut self, client_key: impl Into<String>) -> Self {
        self.client_key = Some(client_key.into());
        self
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Extract from [`load_config`] and validate.
    pub fn load(dir: Option<&Path>) -> Result<Self, LiveQueryError> {
        let config: Self = load_config(dir).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LiveQueryError> {
        if self.server_url.trim().is_empty() {
            return Err(LiveQueryError::Config("server_url is not set".to_string()));
        }
        if self.application_id.trim().is_empty() {
            return Err(LiveQueryError::Config(
                "application_id is not set".to_string(),
            ));
        }
        Ok(())
    }

    /// WebSocket URL for the server: `https` becomes `wss`, anything else `ws`.
    pub fn endpoint(&self) -> Result<Url, LiveQueryError> {
        let invalid = |reason: String| LiveQueryError::InvalidUrl {
            url: self.server_url.clone(),
            reason,
        };

        let mut url = Url::parse(&self.server_url).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| invalid(format!("cannot use scheme {scheme}")))?;
        if let Some(path) = &self.path {
            url.set_path(path);
        }
        Ok(url)
    }
}

/// Build a figment that layers: defaults → live_query.toml → LIVE_QUERY_* env vars.
///
/// With no `dir`, the config file is looked up in the working directory.
pub fn load_config(dir: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let file = match dir {
        Some(dir) => dir.join(CONFIG_FILE_NAME),
        None => CONFIG_FILE_NAME.into(),
    };

    Figment::from(Serialized::defaults(ClientConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}
