//! Project Configuration (dlbind.toml)
//!
//! Handles project-level configuration stored in `dlbind.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Open-flag names accepted in `default_flags`
pub const FLAG_NAMES: [&str; 6] = ["lazy", "now", "global", "local", "nodelete", "noload"];

/// Project configuration from dlbind.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Library loader settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderConfig>,
}

/// `[loader]` table, shared by the project and global files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Directories searched for bare library names, in order
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,

    /// Flags applied when the caller passes none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_flags: Option<Vec<String>>,

    /// Append the platform library extension to names without one (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub append_extension: Option<bool>,

    /// Retry `libc.so` as `libc.so.6` on Linux (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libc_fallback: Option<bool>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        Self::parse(&content, path)
    }

    /// Parse project configuration from TOML text
    pub fn parse(content: &str, path: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(loader) = &self.loader {
            loader.validate("loader")?;
        }
        Ok(())
    }
}

impl LoaderConfig {
    /// Validate flag names and bind-mode consistency
    ///
    /// `prefix` names the table in error messages.
    pub fn validate(&self, prefix: &str) -> ConfigResult<()> {
        if let Some(flags) = &self.default_flags {
            let field = format!("{}.default_flags", prefix);
            for flag in flags {
                if !FLAG_NAMES.contains(&flag.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field,
                        reason: format!("unknown flag '{}'", flag),
                    });
                }
            }

            let has = |name: &str| flags.iter().any(|f| f == name);
            if has("lazy") && has("now") {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "'lazy' and 'now' are mutually exclusive".to_string(),
                });
            }
            if has("global") && has("local") {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "'global' and 'local' are mutually exclusive".to_string(),
                });
            }
        }

        for path in &self.search_paths {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{}.search_paths contains an empty path",
                    prefix
                )));
            }
        }

        Ok(())
    }

    /// Merge another loader table into this one
    ///
    /// Scalar settings from `other` win; search paths from `other` are
    /// placed ahead of the existing ones.
    pub fn merge(&mut self, other: &LoaderConfig) {
        if !other.search_paths.is_empty() {
            let mut paths = other.search_paths.clone();
            paths.extend(self.search_paths.drain(..));
            self.search_paths = paths;
        }
        if other.default_flags.is_some() {
            self.default_flags = other.default_flags.clone();
        }
        if other.append_extension.is_some() {
            self.append_extension = other.append_extension;
        }
        if other.libc_fallback.is_some() {
            self.libc_fallback = other.libc_fallback;
        }
    }
}
