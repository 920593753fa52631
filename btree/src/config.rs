//! Storage configuration.
//!
//! The engine never reads configuration from the environment or from
//! files; embedding applications build a [`StorageConfig`] (or deserialize
//! one with `serde`) and pass it in.
//!
//! # Invariants
//!
//! After a successful [`StorageConfig::validate`]:
//! - `page_size` is a multiple of 8 within `[MIN_PAGE_SIZE, MAX_PAGE_SIZE]`
//! - `cache_capacity` is positive

use serde::{Deserialize, Serialize};

/// Smallest supported page size.
pub const MIN_PAGE_SIZE: usize = 128;

/// Largest supported page size. Heap node offsets are 16 bits wide.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Size of every page in bytes.
    pub page_size: usize,
    /// Number of pages the cache holds at once.
    pub cache_capacity: usize,
}

/// Error returned when a configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl StorageConfig {
    /// Default page size.
    pub const DEFAULT_PAGE_SIZE: usize = 8192;
    /// Default number of cached pages.
    pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

    /// Set the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Check that every field is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConfigError::InvalidValue {
                name: "page_size".to_string(),
                message: format!(
                    "{} is outside {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}",
                    self.page_size
                ),
            });
        }
        if self.page_size % 8 != 0 {
            return Err(ConfigError::InvalidValue {
                name: "page_size".to_string(),
                message: format!("{} is not a multiple of 8", self.page_size),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "cache_capacity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error as ValueError, MapDeserializer};

    #[test]
    fn test_default_values() {
        let config = StorageConfig::default();
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.cache_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_page_size() {
        let too_small = StorageConfig::default().with_page_size(64);
        assert!(too_small.validate().is_err());

        let too_large = StorageConfig::default().with_page_size(MAX_PAGE_SIZE + 8);
        assert!(too_large.validate().is_err());

        let unaligned = StorageConfig::default().with_page_size(1001);
        assert_eq!(
            unaligned.validate().map_err(|e| e.to_string()),
            Err("invalid value for page_size: 1001 is not a multiple of 8".to_string())
        );

        assert!(
            StorageConfig::default()
                .with_page_size(MAX_PAGE_SIZE)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_validate_cache_capacity() {
        let config = StorageConfig::default().with_cache_capacity(0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                name: "cache_capacity".to_string(),
                message: "must be positive".to_string(),
            })
        );
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let fields = vec![("page_size", 4096usize)];
        let deserializer = MapDeserializer::<_, ValueError>::new(fields.into_iter());
        let config = StorageConfig::deserialize(deserializer).expect("deserialize");
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.cache_capacity, StorageConfig::DEFAULT_CACHE_CAPACITY);
    }
}
