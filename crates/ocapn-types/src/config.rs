//! Client configuration loaded from `~/.ocapn/config.toml` with defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Largest frame the default codec will accept (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Settings for an OCapN client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Label used in log lines to tell clients apart.
    pub debug_label: String,
    /// CapTP version sent in `op:start-session`. Peers must match exactly.
    pub captp_version: String,
    /// Wire encodings offered during the Noise handshake.
    pub supported_encodings: Vec<u32>,
    /// Tag attached to every outgoing CapTP message.
    pub epoch: u64,
    /// Maximum accepted frame body in bytes.
    pub max_frame_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            debug_label: "ocapn".to_string(),
            captp_version: "1.0".to_string(),
            supported_encodings: vec![0],
            epoch: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            debug_label: label.into(),
            ..Self::default()
        }
    }
}

/// Load client configuration from a TOML file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> ClientConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return ClientConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<ClientConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                ClientConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            ClientConfig::default()
        }
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    ocapn_home().join("config.toml")
}

/// OCapN home directory.
pub fn ocapn_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ocapn")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.captp_version, "1.0");
        assert_eq!(config.supported_encodings, vec![0]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "debug_label = \"alice\"").unwrap();
        writeln!(f, "supported_encodings = [1, 2, 3]").unwrap();
        drop(f);

        let config = load_config(Some(&path));
        assert_eq!(config.debug_label, "alice");
        assert_eq!(config.supported_encodings, vec![1, 2, 3]);
        assert_eq!(config.captp_version, "1.0");
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_invalid_toml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "epoch = \"not a number\"").unwrap();
        assert_eq!(load_config(Some(&path)), ClientConfig::default());
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let config = ClientConfig::with_label("bob");
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("debug_label = \"bob\""));
        let back: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
