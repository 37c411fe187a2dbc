//! Engine configuration types.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CHUNK_SIZE, MAX_RECURSION_DEPTH};

/// Compression applied when creating archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Zstandard-compressed tar stream.
    #[default]
    Zstd,
    /// Plain tar stream.
    None,
}

/// Configuration shared by the filesystem and archive engines.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Buffer size for streamed file data.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum recursion depth for tree walks.
    #[builder(default = "MAX_RECURSION_DEPTH")]
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Preserve uid/gid on copies when permitted.
    #[builder(default = "false")]
    #[serde(default)]
    pub preserve_ownership: bool,

    /// Archive compression.
    #[builder(default)]
    #[serde(default)]
    pub compression: Compression,

    /// Zstandard level used when compressing.
    #[builder(default = "3")]
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Buffer size of executor result channels.
    #[builder(default = "100")]
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_depth() -> usize {
    MAX_RECURSION_DEPTH
}

fn default_compression_level() -> i32 {
    3
}

fn default_channel_size() -> usize {
    100
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        if self.channel_size == Some(0) {
            return Err("Channel size must be greater than zero".to_string());
        }
        if let Some(level) = self.compression_level {
            if !(1..=22).contains(&level) {
                return Err(format!("Compression level {level} is outside 1..=22"));
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_depth: MAX_RECURSION_DEPTH,
            preserve_ownership: false,
            compression: Compression::Zstd,
            compression_level: 3,
            channel_size: 100,
        }
    }
}
