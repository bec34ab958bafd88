//! Persistent device identity.
//!
//! Every Landrop device carries a stable identifier and a display name.
//! The identifier is a v4 UUID generated on first run and persisted next
//! to the configuration file, so it survives restarts; peers key their
//! registries on it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};

/// A device's stable identity on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable device identifier, persisted across restarts
    pub device_id: Uuid,
    /// Human-readable display name
    pub device_name: String,
}

impl DeviceIdentity {
    /// Load the persisted identity, creating and saving a new one when none
    /// exists yet. The display name comes from the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity file exists but cannot be parsed,
    /// or if a fresh identity cannot be written.
    pub fn load_or_create(config: &Config) -> Result<Self> {
        let path = Self::identity_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::ConfigError(format!("Failed to read identity file: {e}"))
            })?;
            let mut identity: Self = toml::from_str(&content).map_err(|e| {
                Error::ConfigError(format!("Failed to parse identity file: {e}"))
            })?;
            // Display name always follows the live config.
            identity.device_name = config.general.device_name.clone();
            return Ok(identity);
        }

        let identity = Self {
            device_id: Uuid::new_v4(),
            device_name: config.general.device_name.clone(),
        };
        identity.save()?;
        tracing::info!(device_id = %identity.device_id, "Generated new device identity");

        Ok(identity)
    }

    /// Persist this identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity file cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::identity_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize identity: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write identity file: {e}")))
    }

    /// Path to the identity file.
    #[must_use]
    pub fn identity_path() -> PathBuf {
        Config::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("identity.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let identity = DeviceIdentity {
            device_id: Uuid::new_v4(),
            device_name: "Test Device".to_string(),
        };

        let content = toml::to_string_pretty(&identity).expect("serialize");
        let loaded: DeviceIdentity = toml::from_str(&content).expect("parse");

        assert_eq!(loaded.device_id, identity.device_id);
        assert_eq!(loaded.device_name, "Test Device");
    }

    #[test]
    fn test_identity_path_ends_with_toml() {
        assert!(DeviceIdentity::identity_path().ends_with("identity.toml"));
    }
}
