use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use serde_json::{json, Value};

use crate::{
    config::ModuleConfig,
    error::{FetchResult, RegistryError},
    worker_handler::{Fetch, Worker},
};

pub const DEFAULT_FORMAT: &str = "%H:%M";

/// Local time, formatted with a strftime-style `format` parameter.
#[derive(Debug, Clone)]
pub struct ClockFetch {
    format: String,
}

impl ClockFetch {
    pub fn new(format: impl Into<String>) -> Result<Self, String> {
        let format = format.into();
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(format!("`{}` is not a valid time format", format));
        }
        Ok(Self { format })
    }
}

pub fn create(config: &ModuleConfig) -> Result<Worker, RegistryError> {
    let format = match config.param("format") {
        None => DEFAULT_FORMAT,
        Some(value) => value.as_str().ok_or_else(|| RegistryError::InvalidParameter {
            module_type: config.module_type.clone(),
            param: "format",
            reason: "expected a string".to_string(),
        })?,
    };
    let clock = ClockFetch::new(format).map_err(|reason| RegistryError::InvalidParameter {
        module_type: config.module_type.clone(),
        param: "format",
        reason,
    })?;
    Ok(Worker::poll(clock))
}

impl Fetch for ClockFetch {
    fn fetch(&self, _config: &ModuleConfig) -> FetchResult<Value> {
        Ok(json!({ "text": chrono::Local::now().format(&self.format).to_string() }))
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats_time() {
        let value = ClockFetch::new("%Y").unwrap().fetch(&ModuleConfig::new("clock")).unwrap();
        let year = value["text"].as_str().unwrap();
        assert_eq!(year.len(), 4);
        assert!(year.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_rejects_invalid_format() {
        assert!(ClockFetch::new("%Q%").is_err());
        assert!(create(&ModuleConfig::new("clock").with_param("format", "%Q%")).is_err());
        assert!(create(&ModuleConfig::new("clock")).is_ok());
    }
}
