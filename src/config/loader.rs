//! Configuration File Loading
//!
//! Finds and loads configuration files from the usual locations, with an
//! explicit path taking precedence over the search list.

use super::Config;
use crate::error::{Error, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "OPENWRT_VM_SETUP_CONFIG";

const APP_DIR: &str = "openwrt-vm-setup";

/// Configuration file loader
pub struct ConfigLoader {
    /// Base paths (without extension) searched in order
    search_paths: Vec<PathBuf>,
    /// Supported configuration file formats, in search order
    supported_formats: Vec<ConfigFormat>,
    /// Path the configuration was loaded from, if any
    current_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    /// Pick a format from a file extension; anything unknown is read as TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

impl ConfigLoader {
    /// Create a new configuration loader with the default search paths
    pub fn new() -> Self {
        Self::with_search_paths(Self::get_search_paths())
    }

    /// Create a loader that only searches the given base paths
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            supported_formats: vec![ConfigFormat::Toml, ConfigFormat::Json],
            current_path: None,
        }
    }

    /// Load configuration.
    ///
    /// An explicit path must exist and parse. Otherwise the search paths are
    /// searched and the first file that parses wins; files that fail to parse
    /// are skipped with a warning. Without any file the defaults are used.
    pub fn load(&mut self, explicit: Option<&Path>) -> Result<Config> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::ConfigNotFound {
                    path: path.to_path_buf(),
                });
            }
            let config = Self::load_file(path)?;
            self.current_path = Some(path.to_path_buf());
            info!("Loaded configuration from {}", path.display());
            return Ok(config);
        }

        if let Some((path, config)) = self.find_and_load_config() {
            info!("Loaded configuration from {}", path.display());
            self.current_path = Some(path);
            return Ok(config);
        }

        debug!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Load a specific configuration file, choosing the format by extension
    pub fn load_file(path: &Path) -> Result<Config> {
        let format = ConfigFormat::from_path(path);
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content, format)
    }

    /// Parse configuration text in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Config> {
        let config = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    /// Find and load configuration from search paths
    fn find_and_load_config(&self) -> Option<(PathBuf, Config)> {
        for base in &self.search_paths {
            for format in &self.supported_formats {
                let config_path = base.with_extension(format.extension());
                if !config_path.exists() {
                    continue;
                }

                match Self::load_file(&config_path) {
                    Ok(config) => return Some((config_path, config)),
                    Err(e) => {
                        warn!(
                            "Failed to load config from {}: {}",
                            config_path.display(),
                            e
                        );
                    }
                }
            }
        }

        None
    }

    /// Default search paths, most specific first
    fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg_config).join(APP_DIR).join("config"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join(APP_DIR).join("config");
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".config").join(APP_DIR).join("config");
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        if let Ok(cwd) = env::current_dir() {
            paths.push(cwd.join(APP_DIR));
        }

        paths
    }

    /// Path the configuration was loaded from
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// List all search paths
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
