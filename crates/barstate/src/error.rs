use barstate_shared_util::ModuleType;
use thiserror::Error;

/// Failure of a single fetch attempt. Never fatal to a worker, it only triggers the stale-data fallback.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Execution of `{command}` failed with {status}")]
    CommandFailed { command: String, status: std::process::ExitStatus },
    #[error("Command `{0}` produced output that is not valid utf-8")]
    InvalidUtf8(String),
    #[error("I/O error while fetching: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed json in fetch result: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Fetch routine panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Errors raised while turning a module configuration into a runnable worker.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown module type `{0}`")]
    UnknownModuleType(ModuleType),
    #[error("Module type `{module_type}` requires the parameter `{param}`")]
    MissingParameter { module_type: ModuleType, param: &'static str },
    #[error("Parameter `{param}` of module type `{module_type}` is invalid: {reason}")]
    InvalidParameter { module_type: ModuleType, param: &'static str, reason: String },
}
