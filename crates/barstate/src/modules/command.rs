use std::process::Command;

use serde_json::Value;

use crate::{
    config::ModuleConfig,
    error::{FetchError, FetchResult, RegistryError},
    payload,
    registry::required_str_param,
    util::{replace_env_var_references, StringExt},
    worker_handler::{Fetch, Worker},
};

/// Polls a shell command. Its stdout becomes the payload: a json object is taken as-is,
/// anything else ends up in the `text` field.
#[derive(Debug, Clone)]
pub struct CommandFetch {
    command: String,
}

impl CommandFetch {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

pub fn create(config: &ModuleConfig) -> Result<Worker, RegistryError> {
    let command = required_str_param(config, "command")?;
    Ok(Worker::poll(CommandFetch::new(replace_env_var_references(command))))
}

impl Fetch for CommandFetch {
    fn fetch(&self, _config: &ModuleConfig) -> FetchResult<Value> {
        let output = run_command(&self.command)?;
        if output.as_str().is_blank() {
            return Ok(Value::Null);
        }
        Ok(payload::from_output(&output))
    }

    fn persistent(&self) -> bool {
        true
    }
}

/// Run a command through `/bin/sh` and return its stdout
pub fn run_command(cmd: &str) -> FetchResult<String> {
    log::debug!("Running command: {}", cmd);
    let output = Command::new("/bin/sh").arg("-c").arg(cmd).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::debug!("stderr of `{}`: {}", cmd, stderr.trim());
        }
        return Err(FetchError::CommandFailed { command: cmd.to_string(), status: output.status });
    }
    String::from_utf8(output.stdout).map_err(|_| FetchError::InvalidUtf8(cmd.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fetch(command: &str) -> FetchResult<Value> {
        CommandFetch::new(command).fetch(&ModuleConfig::new("command"))
    }

    #[test]
    fn test_plain_output() {
        assert_eq!(fetch("echo hello").unwrap(), json!({"text": "hello"}));
    }

    #[test]
    fn test_json_output() {
        assert_eq!(fetch(r#"echo '{"text": "A", "class": "low"}'"#).unwrap(), json!({"text": "A", "class": "low"}));
    }

    #[test]
    fn test_blank_output_is_empty() {
        assert_eq!(fetch("printf '\\n'").unwrap(), Value::Null);
    }

    #[test]
    fn test_failing_command() {
        assert!(matches!(fetch("exit 3"), Err(FetchError::CommandFailed { .. })));
    }

    #[test]
    fn test_create_requires_command() {
        assert!(create(&ModuleConfig::new("command")).is_err());
        assert!(create(&ModuleConfig::new("command").with_param("command", "true")).is_ok());
    }
}
