// strdict - String interning engine for a columnar document store
// Maps arbitrary strings to compact integer ids and back

#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod dict;
pub mod hash;
pub mod pool;

// Re-exports for convenience
pub use cache::{CacheStats, StringIdCache, StringSource};
pub use config::{CacheConfig, DictionaryConfig, DictionaryKind, IdReusePolicy, SliceConfig};
pub use dict::{DictionaryCounters, LocateResult, StringDictionary, StringId};
pub use pool::TaskPool;

/// Dictionary error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Missing argument: {0}")]
        NullArgument(&'static str),

        #[error("Not found: {0}")]
        NotFound(String),

        #[error("Capacity exceeded: {0}")]
        CapacityExceeded(String),

        #[error("Not implemented: {0}")]
        NotImplemented(String),

        #[error("Internal inconsistency: {0}")]
        InternalInconsistency(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = error::Error::NotFound("id 7".to_string());
        assert_eq!(err.to_string(), "Not found: id 7");

        let err = error::Error::NullArgument("num_buckets");
        assert_eq!(err.to_string(), "Missing argument: num_buckets");
    }

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }
}
