use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Smallest region the cache accepts, header and index included.
pub const MIN_CACHE_SIZE: usize = 102_400;

/// Largest region addressable with the 32-bit offsets stored in the file.
pub const MAX_CACHE_SIZE: usize = u32::MAX as usize - 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total size of the mapped cache file in bytes
    pub cache_size: usize,

    /// Never age entries; the sweeper is not started
    pub ignore_ttl: bool,

    /// Fixed TTL applied to every inserted record (negative = keep upstream TTL)
    pub force_ttl: i64,

    /// Multiplier applied to upstream TTLs (0 disables caching)
    pub multiple_ttl: u32,

    /// Path of the backing file
    pub cache_file: PathBuf,

    /// Reuse an existing compatible file instead of recreating it
    pub reload_cache: bool,

    /// Recreate an incompatible existing file instead of failing
    pub overwrite_cache: bool,

    /// Length of one sweep tick in milliseconds
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_size: 1_048_576,
            ignore_ttl: false,
            force_ttl: -1,
            multiple_ttl: 1,
            cache_file: PathBuf::from("record-cache.db"),
            reload_cache: true,
            overwrite_cache: false,
            sweep_interval_ms: 1000,
        }
    }
}

impl CacheConfig {
    /// Create a CacheConfig from `RECORD_CACHE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup on top of the defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = lookup("RECORD_CACHE_SIZE") {
            config.cache_size = size
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidCacheSize(size.clone()))?;
        }

        if let Some(ignore_ttl) = lookup("RECORD_CACHE_IGNORE_TTL") {
            config.ignore_ttl = parse_bool(&ignore_ttl, false);
        }

        if let Some(force_ttl) = lookup("RECORD_CACHE_FORCE_TTL") {
            config.force_ttl = force_ttl
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidTtl(format!("force_ttl: {}", force_ttl)))?;
        }

        if let Some(multiple) = lookup("RECORD_CACHE_MULTIPLE_TTL") {
            config.multiple_ttl = multiple
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidTtl(format!("multiple_ttl: {}", multiple)))?;
        }

        if let Some(file) = lookup("RECORD_CACHE_FILE") {
            config.cache_file = PathBuf::from(file);
        }

        if let Some(reload) = lookup("RECORD_CACHE_RELOAD") {
            config.reload_cache = parse_bool(&reload, true);
        }

        if let Some(overwrite) = lookup("RECORD_CACHE_OVERWRITE") {
            config.overwrite_cache = parse_bool(&overwrite, false);
        }

        if let Some(interval) = lookup("RECORD_CACHE_SWEEP_INTERVAL_MS") {
            config.sweep_interval_ms = interval
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidSweepInterval(interval.clone()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CacheConfig =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings that cannot be corrected silently
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size > MAX_CACHE_SIZE {
            return Err(ConfigError::InvalidCacheSize(format!(
                "{} exceeds the maximum of {} bytes",
                self.cache_size, MAX_CACHE_SIZE
            )));
        }

        if self.force_ttl > u32::MAX as i64 {
            return Err(ConfigError::InvalidTtl(format!(
                "force_ttl {} does not fit in 32 bits",
                self.force_ttl
            )));
        }

        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidSweepInterval(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Configured size rounded up to the next multiple of 8.
    ///
    /// The minimum size is enforced when the cache is opened, not here.
    pub fn effective_size(&self) -> usize {
        let size = self.cache_size.min(MAX_CACHE_SIZE);
        (size + 7) & !7
    }

    /// Forced TTL, or `None` when upstream TTLs should be used
    pub fn forced_ttl(&self) -> Option<u32> {
        u32::try_from(self.force_ttl).ok()
    }

    pub fn caching_enabled(&self) -> bool {
        self.multiple_ttl > 0
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Settings for a short-lived process that reads or extends the cache of
    /// a running service: the existing file is always reloaded and entries
    /// are not aged.
    pub fn for_inspection(mut self) -> Self {
        if !self.reload_cache {
            warn!("Ignoring reload_cache = false, the existing cache file is kept");
            self.reload_cache = true;
        }
        self.ignore_ttl = true;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = path.into();
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.caching_enabled());
        assert_eq!(config.forced_ttl(), None);
    }

    #[test]
    fn test_effective_size_rounds_up() {
        let config = CacheConfig::default().with_size(102_401);
        assert_eq!(config.effective_size(), 102_408);

        let config = CacheConfig::default().with_size(102_400);
        assert_eq!(config.effective_size(), 102_400);
    }

    #[test]
    fn test_forced_ttl_sentinel() {
        let config = CacheConfig {
            force_ttl: 60,
            ..Default::default()
        };
        assert_eq!(config.forced_ttl(), Some(60));

        let config = CacheConfig {
            force_ttl: -5,
            ..Default::default()
        };
        assert_eq!(config.forced_ttl(), None);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RECORD_CACHE_SIZE", "204800"),
            ("RECORD_CACHE_IGNORE_TTL", "yes"),
            ("RECORD_CACHE_MULTIPLE_TTL", "2"),
            ("RECORD_CACHE_FILE", "/tmp/x.db"),
            ("RECORD_CACHE_OVERWRITE", "on"),
        ]
        .into_iter()
        .collect();

        let config = CacheConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.cache_size, 204_800);
        assert!(config.ignore_ttl);
        assert_eq!(config.multiple_ttl, 2);
        assert_eq!(config.cache_file, PathBuf::from("/tmp/x.db"));
        assert!(config.overwrite_cache);
        assert!(config.reload_cache);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result =
            CacheConfig::from_lookup(|k| (k == "RECORD_CACHE_SIZE").then(|| "lots".to_string()));
        assert!(matches!(result, Err(ConfigError::InvalidCacheSize(_))));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CacheConfig::from_toml_str(
            r#"
            cache_size = 409600
            force_ttl = 30
            cache_file = "cache/records.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_size, 409_600);
        assert_eq!(config.forced_ttl(), Some(30));
        assert_eq!(config.multiple_ttl, 1);
        assert_eq!(config.sweep_interval_ms, 1000);
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let config = CacheConfig {
            sweep_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inspection_keeps_existing_file() {
        let config = CacheConfig::from_toml_str("reload_cache = false\nforce_ttl = 60\n").unwrap();
        assert!(!config.reload_cache);

        let inspected = config.clone().for_inspection();
        assert!(inspected.reload_cache);
        assert!(inspected.ignore_ttl);
        assert_eq!(inspected.force_ttl, config.force_ttl);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("TRUE", false));
        assert!(parse_bool("1", false));
        assert!(parse_bool("on", false));

        assert!(!parse_bool("false", true));
        assert!(!parse_bool("0", true));
        assert!(!parse_bool("off", true));

        assert!(parse_bool("invalid", true));
        assert!(!parse_bool("invalid", false));
    }
}
