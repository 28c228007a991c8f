//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{LoaderConfig, ProjectConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_FILE: &str = "dlbind.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.dlbind/config.toml) - lowest priority
/// 2. Project config (./dlbind.toml) - overrides global
/// 3. Environment variables (DLBIND_*) - overrides project
/// 4. Explicit loader arguments - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where dlbind.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Create a loader that reads the global config from `path` instead of the home directory
    pub fn with_global_path(path: PathBuf) -> Self {
        Self {
            global_config_path: Some(path),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find dlbind.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;

        // Global config is optional
        let global_config = self.load_global_config().unwrap_or_default();

        let project_config = self.apply_env_overrides(project_config, &global_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config, &global_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config) or error if the file is malformed
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.dlbind/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// - `DLBIND_SEARCH_PATH`: platform path list, prepended to search paths
    /// - `DLBIND_BIND`: `lazy` or `now`, replaces the bind mode of the default
    ///   flags in effect after merging `global` and the project
    /// - `DLBIND_APPEND_EXTENSION`, `DLBIND_LIBC_FALLBACK`: booleans
    fn apply_env_overrides(
        &self,
        mut config: ProjectConfig,
        global: &GlobalConfig,
    ) -> ConfigResult<ProjectConfig> {
        let mut overrides = LoaderConfig::default();
        let mut touched = false;

        if let Some(paths) = env::var_os("DLBIND_SEARCH_PATH") {
            overrides.search_paths = env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            touched = true;
        }

        if let Ok(mode) = env::var("DLBIND_BIND") {
            let mode = mode.to_lowercase();
            if mode != "lazy" && mode != "now" {
                return Err(ConfigError::InvalidValue {
                    field: "DLBIND_BIND".to_string(),
                    reason: format!("must be 'lazy' or 'now', got '{}'", mode),
                });
            }
            let mut flags: Vec<String> = [config.loader.as_ref(), global.loader.as_ref()]
                .into_iter()
                .flatten()
                .find_map(|l| l.default_flags.clone())
                .unwrap_or_default()
                .into_iter()
                .filter(|f| f != "lazy" && f != "now")
                .collect();
            flags.push(mode);
            overrides.default_flags = Some(flags);
            touched = true;
        }

        if let Ok(value) = env::var("DLBIND_APPEND_EXTENSION") {
            overrides.append_extension = Some(parse_bool(&value));
            touched = true;
        }

        if let Ok(value) = env::var("DLBIND_LIBC_FALLBACK") {
            overrides.libc_fallback = Some(parse_bool(&value));
            touched = true;
        }

        if touched {
            config
                .loader
                .get_or_insert_with(LoaderConfig::default)
                .merge(&overrides);
        }

        Ok(config)
    }

    /// Get the global configuration directory (~/.dlbind)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".dlbind"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

impl Config {
    /// Effective loader table (project over global)
    pub fn loader(&self) -> LoaderConfig {
        let mut merged = self.global.loader.clone().unwrap_or_default();
        if let Some(project) = &self.project.loader {
            merged.merge(project);
        }
        merged
    }

    /// Search paths, project entries first
    ///
    /// Relative project entries are resolved against the project root.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let project = self
            .project
            .loader
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or_default();
        let global = self
            .global
            .loader
            .as_ref()
            .map(|l| l.search_paths.as_slice())
            .unwrap_or_default();

        project
            .iter()
            .map(|p| match &self.project_root {
                Some(root) if p.is_relative() => root.join(p),
                _ => p.clone(),
            })
            .chain(global.iter().cloned())
            .collect()
    }

    /// Default open flags by name (empty when unset)
    pub fn default_flags(&self) -> Vec<String> {
        self.loader().default_flags.unwrap_or_default()
    }

    /// Whether bare names get the platform extension (default: true)
    pub fn append_extension(&self) -> bool {
        self.loader().append_extension.unwrap_or(true)
    }

    /// Whether `libc.so` is retried as `libc.so.6` (default: true)
    pub fn libc_fallback(&self) -> bool {
        self.loader().libc_fallback.unwrap_or(true)
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has dlbind.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}
