//! Bridge configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::{CLIENT_RECV_CAPACITY, DEFAULT_PORT, HOST_RECV_CAPACITY};

/// Resource identities containing any of these are not replayed by the shell.
pub const DEFAULT_EXCLUSIONS: [&str; 3] = ["mscorlib", "System.Core", "Steamworks"];

/// Shell-side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host port
    pub port: u16,
    /// Largest frame the host accepts in one receive
    pub host_recv_capacity: usize,
    /// Bytes read per receive on the shell side
    pub client_recv_capacity: usize,
    /// Pause after each reply before the prompt is released
    #[serde(with = "duration_ms")]
    pub receive_delay: Duration,
    /// Substrings of resource identities to skip at startup
    pub exclusions: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host_recv_capacity: HOST_RECV_CAPACITY,
            client_recv_capacity: CLIENT_RECV_CAPACITY,
            receive_delay: Duration::from_millis(500),
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Host-side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Listen address
    pub addr: SocketAddr,
    /// Script resources loaded at startup and published to shells
    pub resources: Vec<PathBuf>,
    /// Bytes read per receive
    pub recv_capacity: usize,
    /// Pause before retrying a failed accept
    #[serde(with = "duration_ms")]
    pub accept_retry_delay: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            resources: Vec::new(),
            recv_capacity: HOST_RECV_CAPACITY,
            accept_retry_delay: Duration::from_millis(100),
        }
    }
}

impl HostConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, 5448);
        assert_eq!(config.host_recv_capacity, 4096);
        assert_eq!(config.client_recv_capacity, 8192);
        assert_eq!(config.receive_delay, Duration::from_millis(500));
        assert_eq!(config.exclusions, vec!["mscorlib", "System.Core", "Steamworks"]);
    }

    #[test]
    fn test_host_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.addr.to_string(), "0.0.0.0:5448");
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_bridge_serialization() {
        let config = BridgeConfig {
            receive_delay: Duration::from_millis(25),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"receive_delay\":25"));

        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_host_config_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(
            &path,
            r#"{"addr": "127.0.0.1:6000", "resources": ["a.tsc"]}"#,
        )
        .unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.addr.port(), 6000);
        assert_eq!(config.resources, vec![PathBuf::from("a.tsc")]);
        assert_eq!(config.recv_capacity, HOST_RECV_CAPACITY);
    }

    #[test]
    fn test_host_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            HostConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            HostConfig::from_file(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }
}
