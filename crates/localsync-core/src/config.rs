//! Tunables for change detection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("deletion_threshold must be at least 1")]
    ZeroDeletionThreshold,

    #[error("sample_len must be non-zero when sample_count is set")]
    EmptySamples,
}

/// Per-context sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Consecutive misses before a tracked entry is confirmed deleted
    #[serde(default = "default_deletion_threshold")]
    pub deletion_threshold: u32,

    /// Files up to this size are digested in full
    #[serde(default = "default_full_hash_limit")]
    pub full_hash_limit: u64,

    /// Number of samples digested for larger files
    #[serde(default = "default_sample_count")]
    pub sample_count: u32,

    /// Bytes per sample
    #[serde(default = "default_sample_len")]
    pub sample_len: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            deletion_threshold: default_deletion_threshold(),
            full_hash_limit: default_full_hash_limit(),
            sample_count: default_sample_count(),
            sample_len: default_sample_len(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deletion_threshold == 0 {
            return Err(ConfigError::ZeroDeletionThreshold);
        }
        if self.sample_count > 0 && self.sample_len == 0 {
            return Err(ConfigError::EmptySamples);
        }
        Ok(())
    }
}

fn default_deletion_threshold() -> u32 {
    3
}

fn default_full_hash_limit() -> u64 {
    64 * 1024
}

fn default_sample_count() -> u32 {
    16
}

fn default_sample_len() -> u64 {
    4096
}
