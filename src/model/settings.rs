use crate::error::ConfigError;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const LAST_FILE: &str = "last_file";
pub const DEFAULT_MUSIC_DIRECTORY: &str = "default_music_directory";
pub const REFRESH_RATE: &str = "refresh_rate";

pub const DEFAULT_REFRESH_RATE: u32 = 65;

pub fn default_settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("falling_notes");
    path.push("settings.yaml");
    path
}

/// Opaque string settings kept between runs, stored as a flat YAML map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSettings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl UserSettings {
    /// Loads settings from `path`. A missing or empty file gives empty settings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            debug!("No settings at {}, starting fresh", path.display());
            return Ok(Self {
                path,
                values: BTreeMap::new(),
            });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let values = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Malformed {
                path: path.clone(),
                source,
            })?
        };

        Ok(Self { path, values })
    }

    /// Empty settings that will be written to `path` on save.
    pub fn empty<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: BTreeMap::new(),
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let yaml = serde_yaml::to_string(&self.values).map_err(|source| ConfigError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, yaml).map_err(io_err)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn last_file(&self) -> Option<PathBuf> {
        non_empty(self.get(LAST_FILE, "")).map(PathBuf::from)
    }

    pub fn set_last_file(&mut self, path: &Path) {
        self.set(LAST_FILE, path.to_string_lossy());
    }

    pub fn default_music_directory(&self) -> Option<PathBuf> {
        non_empty(self.get(DEFAULT_MUSIC_DIRECTORY, "")).map(PathBuf::from)
    }

    /// Frames per second for the update loop. An unset value is written back as the default;
    /// an unusable one is cleared so the next run starts from the default again.
    pub fn refresh_rate(&mut self) -> Result<u32, ConfigError> {
        let value = self.get(REFRESH_RATE, "");

        if value.trim().is_empty() {
            self.set(REFRESH_RATE, DEFAULT_REFRESH_RATE.to_string());
            return Ok(DEFAULT_REFRESH_RATE);
        }

        match value.trim().parse::<u32>() {
            Ok(rate) if rate > 0 => Ok(rate),
            _ => {
                warn!("Resetting invalid '{}' setting '{}'..!", REFRESH_RATE, value);
                self.set(REFRESH_RATE, "");
                Err(ConfigError::InvalidValue {
                    key: REFRESH_RATE.to_string(),
                    value,
                })
            }
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
