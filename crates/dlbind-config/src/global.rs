//! Global Configuration (~/.dlbind/config.toml)
//!
//! Handles user-level configuration stored in `~/.dlbind/config.toml`.

use crate::project::LoaderConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.dlbind/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Loader defaults for every project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderConfig>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(loader) = &self.loader {
            loader.validate("loader")?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.dlbind/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".dlbind").join("config.toml"))
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        match (&mut self.loader, &other.loader) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.loader = Some(theirs.clone()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_config() {
        let toml = r#"
[loader]
default_flags = ["now", "local"]
libc_fallback = false
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.loader.unwrap().libc_fallback, Some(false));
    }

    #[test]
    fn test_invalid_global_flag() {
        let config = GlobalConfig {
            loader: Some(LoaderConfig {
                default_flags: Some(vec!["global".to_string(), "local".to_string()]),
                ..Default::default()
            }),
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = GlobalConfig::default();
        let override_config = GlobalConfig {
            loader: Some(LoaderConfig {
                append_extension: Some(false),
                ..Default::default()
            }),
        };

        base.merge(&override_config);
        assert_eq!(base.loader.unwrap().append_extension, Some(false));
    }

    #[test]
    fn test_global_config_path_location() {
        if let Ok(path) = GlobalConfig::global_config_path() {
            assert!(path.ends_with(".dlbind/config.toml"));
        }
    }
}
