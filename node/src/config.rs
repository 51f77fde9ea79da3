//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::NodeError;

/// Port shared by the UDP socket and the TCP listener.
pub const DEFAULT_PORT: u16 = 44444;

/// Configuration for a shoal node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). CLI flags override file values
/// at the daemon boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port for discovery datagrams and direct connections.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory whose file listing is shared with peers.
    #[serde(default = "default_share_dir")]
    pub share_dir: PathBuf,

    /// Display name broadcast to the segment. Must pass
    /// [`validate_nickname`]; the daemon prompts when it is left empty.
    #[serde(default)]
    pub nickname: String,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl NodeConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| NodeError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            share_dir: default_share_dir(),
            nickname: String::new(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

/// Whether `nickname` is acceptable on the wire: 4–16 ASCII alphanumeric
/// characters, nothing else.
pub fn validate_nickname(nickname: &str) -> bool {
    (4..=16).contains(&nickname.len()) && nickname.chars().all(|c| c.is_ascii_alphanumeric())
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_share_dir() -> PathBuf {
    PathBuf::from("./share")
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.port, 44444);
        assert_eq!(config.share_dir, PathBuf::from("./share"));
        assert!(config.nickname.is_empty());
        assert_eq!(config.log_format, "human");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            nickname = "alice42"
            share_dir = "/srv/shared"
            "#,
        )
        .unwrap();
        assert_eq!(config.nickname, "alice42");
        assert_eq!(config.share_dir, PathBuf::from("/srv/shared"));
        assert_eq!(config.port, 44444);
    }

    #[test]
    fn from_toml_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeConfig::from_toml_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NodeError::Config { .. }));
    }

    #[test]
    fn from_toml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shoal.toml");
        std::fs::write(&path, "port = 50505\nnickname = \"bob99\"\n").unwrap();
        let config = NodeConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.port, 50505);
        assert_eq!(config.nickname, "bob99");
    }

    #[test]
    fn nickname_rules() {
        assert!(validate_nickname("abcd"));
        assert!(validate_nickname("Alice1999"));
        assert!(validate_nickname("a23456789012345b"));

        assert!(!validate_nickname("abc")); // too short
        assert!(!validate_nickname("a2345678901234567")); // too long
        assert!(!validate_nickname("has space"));
        assert!(!validate_nickname("dash-ed"));
        assert!(!validate_nickname("émile"));
        assert!(!validate_nickname(""));
    }
}
