use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 64738;
pub const DEFAULT_CONTROL_CHARS: &str = "!";
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 5;

/// Placeholder in `control_chars` replaced by our own username.
pub const NICK_PLACEHOLDER: &str = "{NICK}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tokens: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Voice servers commonly present self-signed certificates.
    #[serde(default)]
    pub verify_certificate: bool,
}

/// Channel to join once our own user shows up. `id` wins over `name`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ChannelSelector {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct MumbleConfig {
    pub identity: Identity,
    pub network: NetworkConfig,
    #[serde(default)]
    pub channel: ChannelSelector,
    #[serde(default = "default_control_chars")]
    pub control_chars: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_control_chars() -> String {
    DEFAULT_CONTROL_CHARS.to_string()
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}

impl MumbleConfig {
    pub fn new(server: String, port: u16, username: String) -> Self {
        Self {
            identity: Identity {
                username,
                password: None,
                tokens: Vec::new(),
            },
            network: NetworkConfig {
                address: server,
                port,
                verify_certificate: false,
            },
            channel: ChannelSelector::default(),
            control_chars: default_control_chars(),
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Command prefix with the nick placeholder resolved.
    pub fn command_prefix(&self) -> String {
        self.control_chars
            .replace(NICK_PLACEHOLDER, &self.identity.username)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, MumbleConfig, DEFAULT_PORT};
    use std::io::Write;
    use std::time::Duration;

    /// `new` populates required fields and leaves optional values empty.
    #[test]
    fn new_sets_defaults() {
        // Arrange
        // Act
        let config = MumbleConfig::new("example.org".to_string(), 64738, "alice".to_string());
        // Assert
        assert_eq!(config.network.address, "example.org");
        assert_eq!(config.network.port, 64738);
        assert_eq!(config.identity.username, "alice");
        assert!(config.identity.password.is_none());
        assert!(config.identity.tokens.is_empty());
        assert_eq!(config.channel.id, None);
        assert_eq!(config.control_chars, "!");
        assert_eq!(config.ping_interval(), Duration::from_secs(5));
    }

    /// JSON with only required fields falls back to defaults.
    #[test]
    fn from_json_applies_defaults() {
        // Arrange
        let raw = r#"{
            "identity": { "username": "relay" },
            "network": { "address": "voice.example" }
        }"#;

        // Act
        let config = MumbleConfig::from_json_str(raw).expect("parse failed");

        // Assert
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert!(!config.network.verify_certificate);
        assert_eq!(config.control_chars, "!");
        assert_eq!(config.channel.name, None);
    }

    /// Every section is read when present.
    #[test]
    fn from_json_reads_all_sections() {
        // Arrange
        let raw = r#"{
            "identity": { "username": "relay", "password": "pw", "tokens": ["a", "b"] },
            "network": { "address": "voice.example", "port": 1234, "verify_certificate": true },
            "channel": { "name": "Lobby" },
            "control_chars": "{NICK}: ",
            "ping_interval_secs": 10
        }"#;

        // Act
        let config = MumbleConfig::from_json_str(raw).expect("parse failed");

        // Assert
        assert_eq!(config.identity.password.as_deref(), Some("pw"));
        assert_eq!(config.identity.tokens, vec!["a", "b"]);
        assert_eq!(config.network.port, 1234);
        assert!(config.network.verify_certificate);
        assert_eq!(config.channel.name.as_deref(), Some("Lobby"));
        assert_eq!(config.command_prefix(), "relay: ");
        assert_eq!(config.ping_interval(), Duration::from_secs(10));
    }

    /// Missing required fields are reported as parse errors.
    #[test]
    fn from_json_rejects_missing_identity() {
        let err = MumbleConfig::from_json_str(r#"{ "network": { "address": "x" } }"#)
            .expect_err("expected parse failure");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    /// Config files are read from disk.
    #[test]
    fn load_reads_file() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
        write!(
            file,
            r#"{{ "identity": {{ "username": "relay" }}, "network": {{ "address": "h" }} }}"#
        )
        .expect("write failed");

        // Act
        let config = MumbleConfig::load(file.path()).expect("load failed");

        // Assert
        assert_eq!(config.identity.username, "relay");
    }

    /// Missing files surface as I/O errors.
    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let err = MumbleConfig::load(dir.path().join("absent.json")).expect_err("expected failure");
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
