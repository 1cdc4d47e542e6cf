use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

/// Prefix of every environment variable the server reads.
pub const ENV_PREFIX: &str = "TELECONSULT_";

/// Server configuration, read from `TELECONSULT_*` variables.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL document links are built from. Defaults to `http://localhost:{port}`.
    pub public_url: Option<String>,
    /// When set, sockets must authenticate with exactly this token.
    /// Otherwise any non-empty token is accepted.
    pub access_token: Option<String>,
    /// Seconds a new socket has to send `authenticate`.
    pub auth_timeout_secs: u64,
    /// Per-session broadcast buffer.
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_url: None,
            access_token: None,
            auth_timeout_secs: 10,
            channel_capacity: 256,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("public_url", &self.public_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("auth_timeout_secs", &self.auth_timeout_secs)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    Env(#[from] envy::Error),
}

impl ServerConfig {
    /// Load from the environment, after reading `app.env` or `.env` if present.
    pub fn load() -> Result<Self, ConfigError> {
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            dotenvy::dotenv().ok();
        }

        match envy::prefixed(ENV_PREFIX).from_env::<ServerConfig>() {
            Ok(config) => {
                info!("Configuration loaded: {:?}", config);
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Whether `token` may open a socket.
    pub fn accepts_token(&self, token: &str) -> bool {
        match &self.access_token {
            Some(expected) => token == expected,
            None => !token.trim().is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string()));
        envy::prefixed(ENV_PREFIX).from_iter(vars).unwrap()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = from_pairs(&[]);
        assert_eq!(config.server_address(), "0.0.0.0:3000");
        assert_eq!(config.public_url(), "http://localhost:3000");
        assert_eq!(config.auth_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_prefixed_variables() {
        let config = from_pairs(&[
            ("TELECONSULT_PORT", "8080"),
            ("TELECONSULT_PUBLIC_URL", "https://consult.example/"),
            ("TELECONSULT_AUTH_TIMEOUT_SECS", "3"),
            ("PORT", "1"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_url(), "https://consult.example");
        assert_eq!(config.auth_timeout_secs, 3);
    }

    #[test]
    fn test_token_acceptance() {
        let open = ServerConfig::default();
        assert!(open.accepts_token("anything"));
        assert!(!open.accepts_token("  "));

        let locked = ServerConfig {
            access_token: Some("secret".to_string()),
            ..ServerConfig::default()
        };
        assert!(locked.accepts_token("secret"));
        assert!(!locked.accepts_token("guess"));
        assert!(!format!("{:?}", locked).contains("secret"));
    }
}
