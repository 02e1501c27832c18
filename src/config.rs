//! Configuration file parser for ~/.config/biasbrief/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields`
//! off), though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`. The API bearer
/// token is deliberately not a config key — it comes from the
/// `BIASBRIEF_API_TOKEN` env var only, so it can never land in a dotfile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the news API.
    pub api_base_url: String,

    /// Path to the preference database. Empty = default location under the
    /// config directory.
    pub db_path: String,

    /// Bound on the number of memoized article pages.
    pub cache_capacity: usize,

    /// How often the preference store is polled for external changes, in
    /// seconds. Around one second is plenty.
    pub preference_poll_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.biasbrief.app".to_string(),
            db_path: String::new(),
            cache_capacity: 64,
            preference_poll_secs: 1,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion from a
        // corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "api_base_url",
                "db_path",
                "cache_capacity",
                "preference_poll_secs",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), api = %config.api_base_url, "Loaded configuration");
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "https://api.biasbrief.app");
        assert_eq!(config.cache_capacity, 64);
        assert_eq!(config.preference_poll_secs, 1);
        assert!(config.db_path.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/biasbrief_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.cache_capacity, 64);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("biasbrief_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, "https://api.biasbrief.app");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("biasbrief_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "cache_capacity = 16\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.preference_poll_secs, 1); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("biasbrief_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
api_base_url = "http://localhost:9000"
db_path = "/tmp/biasbrief.db"
cache_capacity = 128
preference_poll_secs = 5
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:9000");
        assert_eq!(config.db_path, "/tmp/biasbrief.db");
        assert_eq!(config.cache_capacity, 128);
        assert_eq!(config.preference_poll_secs, 5);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("biasbrief_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("biasbrief_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
cache_capacity = 32
totally_fake_key = "should not fail"
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache_capacity, 32);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = std::env::temp_dir().join("biasbrief_config_test_wrongtype");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        // cache_capacity should be an integer, not a string
        std::fs::write(&path, "cache_capacity = \"lots\"\n").unwrap();

        assert!(Config::load(&path).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("biasbrief_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = "a".repeat(1_048_577);
        std::fs::write(&path, content).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
