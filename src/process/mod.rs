//! Child process plumbing
//!
//! Every external program the launcher touches (interpreter probes, venv
//! creation, pip, the UI server) goes through a [`CommandRunner`] so the
//! provisioning pipeline can be exercised without spawning real processes.

#[cfg(test)]
pub(crate) mod testing;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;

/// How long the UI gets to shut down on its own after an interrupt
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed with exit code {code}: {command}")]
    Failed { command: String, code: i32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// True when the program itself could not be found
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProcessError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// A fully described command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    /// Value of an environment variable set on this command
    pub fn env_value(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// True if any argument equals `needle`
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a probe-style command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub code: i32,
    pub stdout: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Executes commands on behalf of the pipeline
pub trait CommandRunner {
    /// Run with inherited stdio and return the exit code
    fn run(&self, spec: &CommandSpec) -> impl Future<Output = Result<i32, ProcessError>>;

    /// Run with stdout captured
    fn capture(
        &self,
        spec: &CommandSpec,
    ) -> impl Future<Output = Result<CapturedOutput, ProcessError>>;

    /// Run a long-lived foreground process that the user stops with an interrupt
    fn run_foreground(&self, spec: &CommandSpec) -> impl Future<Output = Result<i32, ProcessError>> {
        self.run(spec)
    }
}

/// Runner backed by real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<i32, ProcessError> {
        tracing::debug!("Running: {}", spec);
        let status = spec
            .to_command()
            .status()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: spec.to_string(),
                source,
            })?;
        Ok(exit_code(status))
    }

    async fn capture(&self, spec: &CommandSpec) -> Result<CapturedOutput, ProcessError> {
        tracing::debug!("Probing: {}", spec);
        let output = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: spec.to_string(),
                source,
            })?;
        Ok(CapturedOutput {
            code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    async fn run_foreground(&self, spec: &CommandSpec) -> Result<i32, ProcessError> {
        tracing::debug!("Running in foreground: {}", spec);
        let mut child = spec
            .to_command()
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: spec.to_string(),
                source,
            })?;

        tokio::select! {
            status = child.wait() => Ok(exit_code(status?)),
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!("Could not listen for interrupts: {}", e);
                    return Ok(exit_code(child.wait().await?));
                }
                // The child shares our console and receives the interrupt too.
                tracing::info!("Interrupt received, waiting for the app to shut down");
                match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                    Ok(status) => Ok(exit_code(status?)),
                    Err(_) => {
                        tracing::warn!("App did not stop within {:?}, terminating it", SHUTDOWN_GRACE);
                        child.kill().await?;
                        Ok(exit_code(child.wait().await?))
                    }
                }
            }
        }
    }
}

/// Map an exit status to a shell-style exit code
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Run a command and turn a non-zero exit into an error
pub async fn run_checked<R: CommandRunner>(
    runner: &R,
    spec: &CommandSpec,
) -> Result<(), ProcessError> {
    tracing::info!("Running: {}", spec);
    match runner.run(spec).await? {
        0 => Ok(()),
        code => Err(ProcessError::Failed {
            command: spec.to_string(),
            code,
        }),
    }
}

/// Retry settings for network-bound install steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds or the policy is exhausted, returning the last error
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    what,
                    attempt,
                    attempts,
                    e,
                    policy.delay
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a checked command under a retry policy
pub async fn run_with_retry<R: CommandRunner>(
    runner: &R,
    spec: &CommandSpec,
    policy: RetryPolicy,
) -> Result<(), ProcessError> {
    retry(policy, &spec.to_string(), || run_checked(runner, spec)).await
}

/// Search a PATH-style variable for an executable
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_file(candidate))
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
