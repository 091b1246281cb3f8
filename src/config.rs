//! Dictionary and cache configuration
//!
//! All tunables live here so that thresholds for slice sorting and
//! slice-list reordering can be adjusted without touching the engine.
//! Configuration can be built in code or loaded from TOML:
//!
//! ```toml
//! kind = "async"
//! num_buckets = 32
//! threads = 8
//! id_reuse = "recycle"
//!
//! [slice]
//! cache_bytes = 65536
//! reorder_interval = 4096
//! ```

use crate::dict::StringId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;

/// Bytes one slice entry occupies across its three columns (key handle,
/// hash, id), as actually laid out in memory.
pub const SLICE_ENTRY_BYTES: usize =
    size_of::<Arc<str>>() + size_of::<u64>() + size_of::<StringId>();

/// Execution substrate of a dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DictionaryKind {
    /// Batches run on the calling thread
    Sync,
    /// One task per non-empty bucket on a thread pool
    Async,
    /// Declared for configuration compatibility; cannot be created
    Naive,
}

/// What happens to the id of a removed string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdReusePolicy {
    /// Removed ids are never handed out again
    Retire,
    /// Removed ids go to a free-list and are reused by later inserts
    Recycle,
}

/// Per-slice sizing and adaptive-search tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    /// Cache budget one slice must fit in (bytes)
    pub cache_bytes: usize,
    /// Size of the per-slice bloom filter (bytes)
    pub bloom_bytes: usize,
    /// Reads a full slice must serve before it is sorted for binary search
    pub sort_after_reads: u64,
    /// Lookups between two reorder passes of a slice list
    pub reorder_interval: u64,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            cache_bytes: 32 * 1024, // L1d
            bloom_bytes: 1024,
            sort_after_reads: 64,
            reorder_interval: 1024,
        }
    }
}

impl SliceConfig {
    /// Number of entries a slice holds, derived from the cache budget
    pub fn slice_capacity(&self) -> usize {
        self.cache_bytes / SLICE_ENTRY_BYTES
    }

    /// Number of bits in each slice's bloom filter
    pub fn bloom_bits(&self) -> usize {
        self.bloom_bytes * 8
    }
}

/// String dictionary configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryConfig {
    pub kind: DictionaryKind,
    /// Number of hash buckets (fixed for the dictionary's lifetime)
    pub num_buckets: usize,
    /// Initial reservation of the id directory
    pub capacity: usize,
    /// Expected number of distinct strings, used for pre-sizing
    pub approx_unique_strings: usize,
    /// Worker threads for the async variant
    pub threads: usize,
    /// Maximum number of ids the dictionary may ever issue
    pub id_limit: u64,
    pub id_reuse: IdReusePolicy,
    pub slice: SliceConfig,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            kind: DictionaryKind::Sync,
            num_buckets: 16,
            capacity: 1024,
            approx_unique_strings: 1024,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            id_limit: u32::MAX as u64,
            id_reuse: IdReusePolicy::Retire,
            slice: SliceConfig::default(),
        }
    }
}

impl DictionaryConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Failed to parse dictionary config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Check that every size is usable
    pub fn validate(&self) -> Result<()> {
        if self.num_buckets == 0 {
            return Err(Error::NullArgument("num_buckets"));
        }
        if self.kind == DictionaryKind::Async && self.threads == 0 {
            return Err(Error::NullArgument("threads"));
        }
        if self.id_limit == 0 {
            return Err(Error::NullArgument("id_limit"));
        }
        if self.slice.slice_capacity() == 0 {
            return Err(Error::Config(format!(
                "slice.cache_bytes {} is smaller than one entry ({} bytes)",
                self.slice.cache_bytes, SLICE_ENTRY_BYTES
            )));
        }
        if self.slice.bloom_bits() == 0 {
            return Err(Error::NullArgument("slice.bloom_bytes"));
        }
        if self.slice.reorder_interval == 0 {
            return Err(Error::NullArgument("slice.reorder_interval"));
        }
        Ok(())
    }
}

/// Decode cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub num_buckets: usize,
    /// Fixed number of preallocated entries per bucket
    pub entries_per_bucket: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_buckets: 16,
            entries_per_bucket: 1024,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_buckets == 0 {
            return Err(Error::NullArgument("num_buckets"));
        }
        if self.entries_per_bucket == 0 {
            return Err(Error::NullArgument("entries_per_bucket"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_slice_capacity() {
        let slice = SliceConfig::default();
        assert_eq!(slice.slice_capacity(), 32 * 1024 / SLICE_ENTRY_BYTES);
        assert_eq!(slice.bloom_bits(), 8192);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_entry_width_counts_fat_key_handle() {
        // Arc<str> is a fat pointer: 16 bytes, plus 8 for the hash and 8 for the id
        assert_eq!(SLICE_ENTRY_BYTES, 32);
        assert_eq!(SliceConfig::default().slice_capacity(), 1024);
    }

    #[test]
    fn test_parse_toml() -> Result<()> {
        let config = DictionaryConfig::from_toml_str(
            r#"
            kind = "async"
            num_buckets = 4
            threads = 2
            id_reuse = "recycle"

            [slice]
            cache_bytes = 330
            "#,
        )?;

        assert_eq!(config.kind, DictionaryKind::Async);
        assert_eq!(config.num_buckets, 4);
        assert_eq!(config.threads, 2);
        assert_eq!(config.id_reuse, IdReusePolicy::Recycle);
        assert_eq!(config.slice.slice_capacity(), 330 / SLICE_ENTRY_BYTES);
        // Unspecified fields keep their defaults
        assert_eq!(config.slice.bloom_bytes, 1024);
        assert_eq!(config.capacity, 1024);
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_buckets() {
        let config = DictionaryConfig {
            num_buckets: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::NullArgument("num_buckets")));
    }

    #[test]
    fn test_validate_rejects_tiny_slices() {
        let mut config = DictionaryConfig::default();
        config.slice.cache_bytes = 8;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_toml() {
        let err = DictionaryConfig::from_toml_str("num_buckets = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let path = std::env::temp_dir().join(format!("strdict_config_{}.toml", std::process::id()));
        std::fs::write(&path, "num_buckets = 8\n").map_err(|e| Error::Config(e.to_string()))?;

        let config = DictionaryConfig::from_file(&path)?;
        assert_eq!(config.num_buckets, 8);

        std::fs::remove_file(path).ok();
        Ok(())
    }

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.entries_per_bucket, 1024);
        assert!(config.validate().is_ok());
    }
}
