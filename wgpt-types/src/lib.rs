#![doc = include_str!("../README.md")]

use std::{fs, io, path::Path};

use log::debug;
use serde::Deserialize;

const DEFAULT_BLOCK_SIZE: u64 = 512;
const DEFAULT_ESP_SIZE: u64 = 33 << 20;
const DEFAULT_DATA_SIZE: u64 = 1 << 20;
const DEFAULT_PADDING_SIZE: u64 = 1 << 20;

/// Our Error Type
#[derive(thiserror::Error, Debug)]
pub enum WgptError {
    /// An error has occurred when opening, seeking or writing the image
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// The image geometry can't hold a GUID Partition Table
    #[error("Invalid Geometry: {0}")]
    InvalidGeometry(String),

    /// A serialized structure is too short, or has a wrong signature or size
    #[error("Invalid Structure: {0}")]
    InvalidStructure(String),

    /// An error has occurred when parsing TOML configuration files
    #[error("Configuration File Format Error")]
    Config(#[from] toml::de::Error),
}

/// Disk Image Configuration
///
/// All sizes are in bytes. The image size is the sum of the EFI System
/// Partition, data partition and padding sizes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    /// Logical block (sector) size
    pub block_size: u64,

    /// EFI System Partition size
    pub esp_size: u64,

    /// Data Partition size
    pub data_size: u64,

    /// Extra space left at the end of the image
    pub padding_size: u64,
}

impl ImageConfig {
    /// Parses a configuration from a TOML string. Missing keys keep their
    /// default value.
    ///
    /// # Errors
    ///
    /// Returns [`WgptError::Config`] if the string isn't valid TOML or holds
    /// unknown keys.
    pub fn from_toml_str(s: &str) -> Result<Self, WgptError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads a configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`WgptError::Io`] if the file can't be read, and
    /// [`WgptError::Config`] if its content is invalid.
    pub fn from_file(path: &Path) -> Result<Self, WgptError> {
        debug!("Loading configuration from {}", path.display());

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Returns the total image size in bytes
    ///
    /// # Errors
    ///
    /// Returns [`WgptError::InvalidGeometry`] if the sum overflows.
    pub fn total_size(&self) -> Result<u64, WgptError> {
        self.esp_size
            .checked_add(self.data_size)
            .and_then(|s| s.checked_add(self.padding_size))
            .ok_or(WgptError::InvalidGeometry(
                "Image size overflows".to_owned(),
            ))
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            esp_size: DEFAULT_ESP_SIZE,
            data_size: DEFAULT_DATA_SIZE,
            padding_size: DEFAULT_PADDING_SIZE,
        }
    }
}
