use std::env;
use std::path::{Path, PathBuf};

use crate::store_error::{StoreError, StoreResult};

/// Default LMDB map size (256 MiB). Documents hold rendered PDFs.
pub const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;
pub const DEFAULT_MAX_READERS: u32 = 126;
pub const DEFAULT_DB_PATH: &str = "optometry.lmdb";

/// Location and sizing of the LMDB environment backing a [`RecordStore`].
///
/// [`RecordStore`]: crate::local_db_state::RecordStore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Environment directory. Created on first connect if missing.
    pub path: PathBuf,
    /// Maximum size of the memory map, in bytes.
    pub map_size: usize,
    pub max_readers: u32,
}

impl StoreConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            map_size: DEFAULT_MAP_SIZE,
            max_readers: DEFAULT_MAX_READERS,
        }
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    /// Load configuration from environment variables
    ///
    /// - `OPTOMETRY_DB_PATH` (default `optometry.lmdb`)
    /// - `OPTOMETRY_DB_MAP_SIZE_MB` (default 256)
    /// - `OPTOMETRY_DB_MAX_READERS` (default 126)
    pub fn from_env() -> StoreResult<Self> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let path = env::var("OPTOMETRY_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let mut config = Self::new(path);

        if let Ok(raw) = env::var("OPTOMETRY_DB_MAP_SIZE_MB") {
            config.map_size = map_size_from_megabytes(&raw)?;
        }

        if let Ok(raw) = env::var("OPTOMETRY_DB_MAX_READERS") {
            config.max_readers = raw.trim().parse().map_err(|_| {
                StoreError::Configuration(format!("invalid OPTOMETRY_DB_MAX_READERS: {raw}"))
            })?;
        }

        Ok(config)
    }
}

/// Parse `OPTOMETRY_DB_MAP_SIZE_MB` into a byte count.
fn map_size_from_megabytes(raw: &str) -> StoreResult<usize> {
    let megabytes: usize = raw.trim().parse().map_err(|_| {
        StoreError::Configuration(format!("invalid OPTOMETRY_DB_MAP_SIZE_MB: {raw}"))
    })?;
    if megabytes == 0 {
        return Err(StoreError::Configuration(
            "OPTOMETRY_DB_MAP_SIZE_MB must be greater than zero".to_string(),
        ));
    }
    megabytes.checked_mul(1024 * 1024).ok_or_else(|| {
        StoreError::Configuration(format!("OPTOMETRY_DB_MAP_SIZE_MB is too large: {raw}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = StoreConfig::new("/tmp/exams")
            .with_map_size(1024 * 1024)
            .with_max_readers(8);

        assert_eq!(config.path, PathBuf::from("/tmp/exams"));
        assert_eq!(config.map_size, 1024 * 1024);
        assert_eq!(config.max_readers, 8);
    }

    #[test]
    fn new_uses_default_sizing() {
        let config = StoreConfig::new("db");
        assert_eq!(config.map_size, DEFAULT_MAP_SIZE);
        assert_eq!(config.max_readers, DEFAULT_MAX_READERS);
    }

    #[test]
    fn map_size_is_parsed_in_megabytes() {
        assert_eq!(map_size_from_megabytes(" 64 ").unwrap(), 64 * 1024 * 1024);
    }

    #[test]
    fn map_size_rejects_zero_and_garbage() {
        assert!(matches!(map_size_from_megabytes("0"), Err(StoreError::Configuration(_))));
        assert!(matches!(map_size_from_megabytes("lots"), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn map_size_overflow_is_a_configuration_error() {
        match map_size_from_megabytes(&usize::MAX.to_string()) {
            Err(StoreError::Configuration(msg)) => assert!(msg.contains("too large")),
            other => panic!("Expected a configuration error, got {other:?}"),
        }
    }
}
