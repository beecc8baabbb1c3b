use std::time::Duration;

use futures::future::BoxFuture;
use nix::{
    sys::signal,
    unistd::{setpgid, Pid},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ModuleConfig,
    error::{FetchError, FetchResult, RegistryError},
    payload,
    registry::required_str_param,
    util::replace_env_var_references,
    worker_handler::{Listen, Publisher, Worker},
};

/// How long a listener process gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Runs a long-lived shell command and publishes every line it prints, i.e. a compositor event stream
/// filtered through `jq`.
#[derive(Debug, Clone)]
pub struct CommandListener {
    command: String,
}

impl CommandListener {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

pub fn create(config: &ModuleConfig) -> Result<Worker, RegistryError> {
    let command = required_str_param(config, "command")?;
    Ok(Worker::listen(CommandListener::new(replace_env_var_references(command))))
}

impl Listen for CommandListener {
    fn listen<'a>(&'a self, _config: &'a ModuleConfig, publisher: Publisher, cancel: CancellationToken) -> BoxFuture<'a, FetchResult<()>> {
        Box::pin(async move {
            log::debug!("Starting listener `{}` for {}", self.command, publisher.key());
            let mut handle = spawn_in_process_group(&self.command)?;
            let stdout = handle.stdout.take().ok_or_else(|| FetchError::Other("listener stdout was not captured".to_string()))?;
            let stderr = handle.stderr.take().ok_or_else(|| FetchError::Other("listener stderr was not captured".to_string()))?;
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();
            let mut stderr_open = true;

            let result = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Ok(()),
                    line = stdout_lines.next_line() => match line {
                        Ok(Some(line)) => publisher.publish(payload::from_output(&line)).await,
                        Ok(None) => break Ok(()),
                        Err(err) => break Err(FetchError::Io(err)),
                    },
                    line = stderr_lines.next_line(), if stderr_open => match line {
                        Ok(Some(line)) => log::warn!("stderr of `{}`: {}", publisher.key(), line),
                        _ => stderr_open = false,
                    },
                }
            };
            terminate_handle(handle, TERMINATE_GRACE_PERIOD).await;
            result
        })
    }
}

/// Spawn `sh -c <command>` as the leader of a new process group, so everything it starts can be signalled at once.
fn spawn_in_process_group(command: &str) -> std::io::Result<tokio::process::Child> {
    // SAFETY: the pre_exec closure only calls setpgid, which is async-signal-safe.
    unsafe {
        tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .pre_exec(|| {
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                Ok(())
            })
            .spawn()
    }
}

/// SIGTERM the process group of `child`, then SIGKILL it if the leader is still around after `grace_period`.
async fn terminate_handle(mut child: tokio::process::Child, grace_period: Duration) {
    if let Some(id) = child.id() {
        log::debug!("Killing process group of listener with id {}", id);
        let pgid = Pid::from_raw(id as i32);
        let _ = signal::killpg(pgid, signal::SIGTERM);
        tokio::select! {
            _ = child.wait() => { },
            _ = tokio::time::sleep(grace_period) => {
                let _ = signal::killpg(pgid, signal::SIGKILL);
                let _ = child.wait().await;
            }
        };
    } else {
        let _ = child.wait().await;
    }
}
