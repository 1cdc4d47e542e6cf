//! Session configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::protocol::{NAME_PARAM, PARTICIPANT_PARAM, ParticipantId};

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default base delay of the reconnection backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;
/// Default time allowed for the initial socket open.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default time a pending document selection may wait for confirmation.
pub const DEFAULT_SELECTION_TIMEOUT_MS: u64 = 10_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid socket URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Socket URL cannot take a path: {0}")]
    NotABase(String),
    #[error("Session id is empty")]
    EmptySessionId,
}

/// Everything needed to join a live session.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_id: String,
    /// Base socket URL, e.g. `ws://host:3000`.
    pub socket_url: String,
    /// Base URL of the document REST API.
    pub api_base_url: String,
    pub token: String,
    /// Name shown to the other participants.
    pub display_name: Option<String>,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub selection_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            socket_url: "ws://localhost:3000".to_string(),
            api_base_url: "http://localhost:3000/api".to_string(),
            token: String::new(),
            display_name: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            selection_timeout_ms: DEFAULT_SELECTION_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_id", &self.session_id)
            .field("socket_url", &self.socket_url)
            .field("api_base_url", &self.api_base_url)
            .field("token", &"<redacted>")
            .field("display_name", &self.display_name)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_base_delay_ms", &self.reconnect_base_delay_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("selection_timeout_ms", &self.selection_timeout_ms)
            .finish()
    }
}

impl SessionConfig {
    pub fn new(session_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = url.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }

    /// Full socket endpoint for this session: `{socket_url}/sesiones/{id}/ws`.
    pub fn socket_endpoint(&self) -> Result<Url, ConfigError> {
        if self.session_id.trim().is_empty() {
            return Err(ConfigError::EmptySessionId);
        }
        let mut url = Url::parse(self.socket_url.trim())?;
        url.path_segments_mut()
            .map_err(|_| ConfigError::NotABase(self.socket_url.clone()))?
            .pop_if_empty()
            .extend(["sesiones", self.session_id.as_str(), "ws"]);
        Ok(url)
    }

    /// [`Self::socket_endpoint`] tagged with who is connecting, so the server
    /// announces presence under the same id the participant's events carry.
    pub fn participant_endpoint(&self, local_id: &ParticipantId) -> Result<Url, ConfigError> {
        let mut url = self.socket_endpoint()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(PARTICIPANT_PARAM, local_id.as_str());
            if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
                query.append_pair(NAME_PARAM, name);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_socket_endpoint() {
        let config = SessionConfig::new("abc", "t").with_socket_url("ws://example.org:9000/");
        assert_eq!(
            config.socket_endpoint().unwrap().as_str(),
            "ws://example.org:9000/sesiones/abc/ws"
        );
    }

    #[test]
    fn test_socket_endpoint_escapes_session_id() {
        let config = SessionConfig::new("a/b?c#d", "t").with_socket_url("ws://example.org/base");
        assert_eq!(
            config.socket_endpoint().unwrap().as_str(),
            "ws://example.org/base/sesiones/a%2Fb%3Fc%23d/ws"
        );
    }

    #[test]
    fn test_participant_endpoint_query() {
        let config = SessionConfig::new("s1", "t")
            .with_socket_url("ws://example.org")
            .with_display_name("Dra. Ruiz");
        let url = config.participant_endpoint(&ParticipantId::from("u 7")).unwrap();
        assert_eq!(url.path(), "/sesiones/s1/ws");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("usuarioId".to_string(), "u 7".to_string()),
                ("nombre".to_string(), "Dra. Ruiz".to_string()),
            ]
        );

        let anonymous = SessionConfig::new("s1", "t").participant_endpoint(&ParticipantId::from("u1")).unwrap();
        assert_eq!(anonymous.query(), Some("usuarioId=u1"));
    }

    #[test]
    fn test_empty_session_rejected() {
        let config = SessionConfig::new(" ", "t");
        assert!(matches!(config.socket_endpoint(), Err(ConfigError::EmptySessionId)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"session_id":"s1","token":"x","max_reconnect_attempts":2}"#).unwrap();
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = SessionConfig::new("s", "very-secret");
        assert!(!format!("{:?}", config).contains("very-secret"));
    }
}
