use std::collections::HashMap;

use barstate_shared_util::ModuleType;

use crate::{config::ModuleConfig, error::RegistryError, worker_handler::Worker};

pub type WorkerFactory = Box<dyn Fn(&ModuleConfig) -> Result<Worker, RegistryError> + Send + Sync>;

/// Maps module type names, as used in the `type` field of a module's configuration, to the code that builds
/// its worker. Built once at startup and handed to whoever needs to create workers.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: HashMap<ModuleType, WorkerFactory>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry").field("module_types", &self.module_types()).finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry containing every module type that ships with barstate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::modules::register_builtins(&mut registry);
        registry
    }

    /// Register `factory` under `module_type`, replacing any previous registration of that name.
    pub fn register<F>(&mut self, module_type: impl Into<ModuleType>, factory: F)
    where
        F: Fn(&ModuleConfig) -> Result<Worker, RegistryError> + Send + Sync + 'static,
    {
        let module_type = module_type.into();
        if self.factories.insert(module_type.clone(), Box::new(factory)).is_some() {
            log::debug!("Replaced registration of module type {}", module_type);
        }
    }

    pub fn create(&self, config: &ModuleConfig) -> Result<Worker, RegistryError> {
        let factory =
            self.factories.get(&config.module_type).ok_or_else(|| RegistryError::UnknownModuleType(config.module_type.clone()))?;
        factory(config)
    }

    pub fn contains(&self, module_type: &str) -> bool {
        self.factories.contains_key(module_type)
    }

    pub fn module_types(&self) -> Vec<&ModuleType> {
        let mut types: Vec<_> = self.factories.keys().collect();
        types.sort();
        types
    }
}

/// Fetch a required string parameter of a module configuration.
pub fn required_str_param<'a>(config: &'a ModuleConfig, param: &'static str) -> Result<&'a str, RegistryError> {
    match config.param(param) {
        Some(value) => value.as_str().ok_or_else(|| RegistryError::InvalidParameter {
            module_type: config.module_type.clone(),
            param,
            reason: format!("expected a string, got {}", value),
        }),
        None => Err(RegistryError::MissingParameter { module_type: config.module_type.clone(), param }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::FetchResult, worker_handler::Fetch};
    use serde_json::{json, Value};

    struct Constant(Value);

    impl Fetch for Constant {
        fn fetch(&self, _: &ModuleConfig) -> FetchResult<Value> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ModuleRegistry::new();
        registry.register("constant", |config| {
            let text = required_str_param(config, "text")?;
            Ok(Worker::poll(Constant(json!({ "text": text }))))
        });

        assert!(registry.contains("constant"));
        let worker = registry.create(&ModuleConfig::new("constant").with_param("text", "hi")).unwrap();
        match worker {
            Worker::Poll(fetch) => assert_eq!(fetch.fetch(&ModuleConfig::new("constant")).unwrap(), json!({"text": "hi"})),
            Worker::Listen(_) => panic!("expected a poll worker"),
        }
    }

    #[test]
    fn test_unknown_type() {
        let registry = ModuleRegistry::new();
        let err = registry.create(&ModuleConfig::new("nope")).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownModuleType(t) if t.as_str() == "nope"));
    }

    #[test]
    fn test_missing_and_invalid_params() {
        let config = ModuleConfig::new("command");
        assert!(matches!(required_str_param(&config, "command"), Err(RegistryError::MissingParameter { param: "command", .. })));
        let config = config.with_param("command", 3);
        assert!(matches!(required_str_param(&config, "command"), Err(RegistryError::InvalidParameter { param: "command", .. })));
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = ModuleRegistry::with_builtins();
        let types: Vec<_> = registry.module_types().into_iter().map(|t| t.as_str()).collect();
        assert_eq!(types, vec!["clock", "command", "file", "listen"]);
    }
}
