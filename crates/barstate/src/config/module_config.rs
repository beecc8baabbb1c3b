use std::time::Duration;

use barstate_shared_util::ModuleType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration of a single module instance, as written in the config file.
///
/// Apart from the few fields the worker machinery itself reads, this is an open map of
/// module-specific parameters, handed unchanged to the module's fetch routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Name of the module implementation in the registry.
    #[serde(rename = "type")]
    pub module_type: ModuleType,

    /// Seconds between two fetches. Falls back to the routine's default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,

    /// Whether the last good payload is persisted to disk. Falls back to the routine's default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,

    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ModuleConfig {
    pub fn new(module_type: impl Into<ModuleType>) -> Self {
        Self { module_type: module_type.into(), interval: None, cache: None, params: Map::new() }
    }

    pub fn with_interval(mut self, seconds: f64) -> Self {
        self.interval = Some(seconds);
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// The configured interval, if it is a usable positive number of seconds.
    pub fn interval(&self) -> Option<Duration> {
        match self.interval {
            Some(secs) if secs > 0.0 => match Duration::try_from_secs_f64(secs) {
                Ok(interval) => Some(interval),
                Err(_) => {
                    log::warn!("Ignoring out of range interval {} for {} module", secs, self.module_type);
                    None
                }
            },
            Some(secs) => {
                log::warn!("Ignoring invalid interval {} for {} module", secs, self.module_type);
                None
            }
            None => None,
        }
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}
