//! File fingerprints: size, mtime and a content digest.
//!
//! The digest is only recomputed when size or mtime moved, so an untouched
//! file costs one stat per check. Files above `full_hash_limit` are digested
//! from evenly spaced samples rather than read in full.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::SyncConfig;
use crate::fs::{FileHandle, Result};

/// Content-identity summary of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime_millis: u64,
    pub digest: [u8; 32],
}

impl Fingerprint {
    /// Hex form of the digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Whether `size` and `mtime` still match what the handle reports.
    fn matches_metadata(&self, size: u64, mtime_millis: u64) -> bool {
        self.size == size && self.mtime_millis == mtime_millis
    }

    /// Compute a fingerprint from an open handle.
    pub async fn generate<H: FileHandle + ?Sized>(handle: &mut H, config: &SyncConfig) -> Result<Self> {
        let size = handle.info().size;
        let mtime_millis = handle.info().mtime_millis;

        let mut hasher = Sha256::new();
        hasher.update(size.to_le_bytes());

        if size <= config.full_hash_limit {
            let content = handle.read_at(0, size as usize).await?;
            hasher.update(&content);
        } else {
            for offset in sample_offsets(size, config.sample_count, config.sample_len) {
                let chunk = handle.read_at(offset, config.sample_len as usize).await?;
                hasher.update(&chunk);
            }
        }

        Ok(Self {
            size,
            mtime_millis,
            digest: hasher.finalize().into(),
        })
    }

    /// Refresh `current` from `handle`. Returns true if the fingerprint changed.
    ///
    /// On a read error `current` is left untouched.
    pub async fn refresh<H: FileHandle + ?Sized>(
        current: &mut Option<Fingerprint>,
        handle: &mut H,
        config: &SyncConfig,
    ) -> Result<bool> {
        let info = handle.info();
        if let Some(fp) = current.as_ref() {
            if fp.matches_metadata(info.size, info.mtime_millis) {
                return Ok(false);
            }
        }

        let fresh = Self::generate(handle, config).await?;
        let changed = current.as_ref() != Some(&fresh);
        *current = Some(fresh);
        Ok(changed)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.size, self.mtime_millis, &self.digest_hex()[..12])
    }
}

/// Evenly spaced sample offsets covering the first and last `sample_len` bytes.
fn sample_offsets(size: u64, count: u32, sample_len: u64) -> Vec<u64> {
    let span = size.saturating_sub(sample_len);
    match count {
        0 => Vec::new(),
        1 => vec![0],
        n => (0..n as u64).map(|i| span * i / (n as u64 - 1)).collect(),
    }
}
