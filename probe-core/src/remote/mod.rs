//! Remote execution seam. Lifecycle, deploy and feed code only ever talk to a sensor host
//! through these two traits.

#[cfg(test)]
pub(crate) mod mock;
mod ssh;

pub use ssh::{shell_quote, SshTransport};

use std::path::Path;

use crate::catalog::Host;

/// One step of an ordered remote command list. `name` identifies the step in errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCommand {
  pub name: String,
  pub command: String,
}

impl NamedCommand {
  pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      command: command.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
  pub name: String,
  pub stdout: String,
  pub stderr: String,
}

/// Failure of one step in an ordered command list.
#[derive(Debug)]
pub struct StepFailure {
  pub step: String,
  pub error: anyhow::Error,
}

impl std::fmt::Display for StepFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "step `{}`: {:#}", self.step, self.error)
  }
}

impl std::error::Error for StepFailure {}

pub trait CommandRunner: Send + Sync {
  /// Runs `commands` in order on `host`, stopping at the first failing step. The error is a
  /// `StepFailure` naming that step.
  fn execute(
    &self,
    host: &Host,
    commands: &[NamedCommand],
    elevate: bool,
  ) -> anyhow::Result<Vec<CommandOutput>>;
}

pub trait FilePusher: Send + Sync {
  fn copy_file(
    &self,
    host: &Host,
    local: &Path,
    remote: &str,
    owner: &str,
    mode: u32,
    elevate: bool,
  ) -> anyhow::Result<()>;
}

/// Name of the step that failed, when `err` came out of `CommandRunner::execute`.
pub fn failed_step(err: &anyhow::Error) -> Option<&str> {
  err.downcast_ref::<StepFailure>().map(|f| f.step.as_str())
}

/// The `ProbeError` for a failed command list, naming the failing step when known.
pub fn remote_error(host: &Host, fallback_step: &str, err: &anyhow::Error) -> crate::error::ProbeError {
  let step = failed_step(err).unwrap_or(fallback_step);
  match err.downcast_ref::<StepFailure>() {
    Some(f) => crate::error::ProbeError::remote(&host.address, step, &f.error),
    None => crate::error::ProbeError::remote(&host.address, step, err),
  }
}
