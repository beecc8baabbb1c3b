use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Stores references to all the paths relevant to barstate, and abstracts access to these files and directories
#[derive(Debug, Clone)]
pub struct BarPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl BarPaths {
    pub fn from_config_dir<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        if config_dir.is_file() {
            bail!("Please provide the path to the config directory, not a file within it")
        }

        if !config_dir.exists() {
            bail!("Configuration directory {} does not exist", config_dir.display());
        }

        let config_dir = config_dir.canonicalize()?;
        let cache_dir = default_cache_dir()?;
        Self::with_dirs(config_dir, cache_dir)
    }

    /// Build paths from explicit directories, creating the cache directory if needed.
    pub fn with_dirs(config_dir: PathBuf, cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            log::info!("Creating cache dir {}", cache_dir.display());
            std::fs::create_dir_all(&cache_dir).with_context(|| format!("Failed to create {}", cache_dir.display()))?;
        }
        Ok(BarPaths { config_dir, cache_dir })
    }

    pub fn default() -> Result<Self> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| home_dir().map(|home| home.join(".config")))?
            .join("barstate");

        Self::from_config_dir(config_dir)
    }

    pub fn get_config_dir(&self) -> &Path {
        self.config_dir.as_path()
    }

    pub fn get_cache_dir(&self) -> &Path {
        self.cache_dir.as_path()
    }

    pub fn get_config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var("HOME").map(PathBuf::from).context("Neither the XDG base directories nor HOME are set")
}

fn default_cache_dir() -> Result<PathBuf> {
    Ok(std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|_| home_dir().map(|home| home.join(".cache")))?
        .join("barstate"))
}

impl std::fmt::Display for BarPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config-dir: {}, cache-dir: {}", self.config_dir.display(), self.cache_dir.display())
    }
}
