//! Configuration management for veilfs

use crate::crypto::stream::AES_BLOCK;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default plaintext block size for the read/modify/write loop: 64 KiB
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Encrypted store configuration
    pub store: StoreConfig,

    /// Mount configuration
    pub mount: MountConfig,
}

/// Encrypted store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Plaintext block size for random-access reads and writes.
    /// Must be a non-zero multiple of the AES block size.
    pub block_size: usize,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,

    /// Filesystem name reported to the kernel
    pub fs_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig::default(),
            mount: MountConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            allow_other: false,
            allow_root: false,
            fs_name: "veilfs".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.block_size == 0 {
            return Err(Error::Config(
                "Block size must be greater than 0".to_string(),
            ));
        }

        if self.store.block_size % AES_BLOCK != 0 {
            return Err(Error::Config(format!(
                "Block size must be a multiple of {} bytes",
                AES_BLOCK
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_rejects_unaligned_block_size() {
        let mut config = Config::default();
        config.store.block_size = 1000;
        assert!(config.validate().is_err());

        config.store.block_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.store.block_size = 4096;
        config.mount.allow_other = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.store.block_size, 4096);
        assert!(loaded.mount.allow_other);
    }
}
