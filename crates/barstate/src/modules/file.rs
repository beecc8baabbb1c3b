use std::path::PathBuf;

use serde_json::Value;

use crate::{
    config::ModuleConfig,
    error::{FetchResult, RegistryError},
    payload,
    registry::required_str_param,
    util::replace_env_var_references,
    worker_handler::{Fetch, Worker},
};

/// Reads a file on every poll, i.e. a sysfs attribute like `/sys/class/power_supply/BAT0/capacity`.
#[derive(Debug, Clone)]
pub struct FileFetch {
    path: PathBuf,
}

impl FileFetch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

pub fn create(config: &ModuleConfig) -> Result<Worker, RegistryError> {
    let path = required_str_param(config, "path")?;
    Ok(Worker::poll(FileFetch::new(replace_env_var_references(path))))
}

impl Fetch for FileFetch {
    fn fetch(&self, _config: &ModuleConfig) -> FetchResult<Value> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(payload::from_output(&content))
    }

    fn default_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::test_util::TempDir, error::FetchError};
    use serde_json::json;

    #[test]
    fn test_reads_file() {
        let dir = TempDir::new("file-module");
        let path = dir.0.join("capacity");
        std::fs::write(&path, "87\n").unwrap();
        assert_eq!(FileFetch::new(&path).fetch(&ModuleConfig::new("file")).unwrap(), json!({"text": "87"}));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = FileFetch::new("/definitely/not/here").fetch(&ModuleConfig::new("file"));
        assert!(matches!(result, Err(FetchError::Io(_))));
    }
}
