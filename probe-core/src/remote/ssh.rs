use anyhow::Context;
use std::path::Path;
use std::process::Command;

use super::{CommandOutput, CommandRunner, FilePusher, NamedCommand, StepFailure};
use crate::catalog::Host;
use crate::config::RemoteConfig;
use crate::runtime;

/// `CommandRunner` and `FilePusher` over the system `ssh`/`scp` clients. Authentication is
/// key based (`BatchMode=yes`): a host that would prompt for a password fails instead.
pub struct SshTransport {
  cfg: RemoteConfig,
}

impl SshTransport {
  pub fn new(cfg: RemoteConfig) -> Self {
    Self { cfg }
  }

  fn common_options(&self) -> Vec<String> {
    let mut args = vec![
      "-o".to_string(),
      "BatchMode=yes".to_string(),
      "-o".to_string(),
      format!("ConnectTimeout={}", self.cfg.connect_timeout_seconds),
    ];
    if let Some(identity) = self.cfg.identity_file.as_deref().filter(|s| !s.trim().is_empty()) {
      args.push("-i".to_string());
      args.push(identity.to_string());
    }
    args
  }

  fn ssh_args(&self, host: &Host, command: &str, elevate: bool) -> Vec<String> {
    let mut args = self.common_options();
    args.push("-p".to_string());
    args.push(host.port.to_string());
    args.push(format!("{}@{}", host.user, host.address));
    args.push("--".to_string());
    args.push(self.remote_command(command, elevate));
    args
  }

  fn remote_command(&self, command: &str, elevate: bool) -> String {
    let wrapped = format!("sh -c {}", shell_quote(command));
    if elevate && !self.cfg.become_command.trim().is_empty() {
      format!("{} {wrapped}", self.cfg.become_command.trim())
    } else {
      wrapped
    }
  }

  fn run_ssh(&self, host: &Host, command: &str, elevate: bool) -> anyhow::Result<CommandOutput> {
    let output = Command::new(&self.cfg.ssh_binary)
      .args(self.ssh_args(host, command, elevate))
      .output()
      .with_context(|| format!("run {}", self.cfg.ssh_binary))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() {
      return Err(anyhow::anyhow!(
        "ssh {} failed ({}): stdout='{}' stderr='{}'",
        host.address,
        output.status,
        stdout.trim(),
        stderr.trim()
      ));
    }
    Ok(CommandOutput {
      name: String::new(),
      stdout,
      stderr,
    })
  }
}

impl CommandRunner for SshTransport {
  fn execute(
    &self,
    host: &Host,
    commands: &[NamedCommand],
    elevate: bool,
  ) -> anyhow::Result<Vec<CommandOutput>> {
    let mut outputs = Vec::with_capacity(commands.len());
    for cmd in commands {
      if runtime::is_dry_run() {
        tracing::warn!(
          host = %host.address,
          step = %cmd.name,
          command = %cmd.command,
          "DRY-RUN: would run remote command"
        );
        outputs.push(CommandOutput {
          name: cmd.name.clone(),
          stdout: String::new(),
          stderr: String::new(),
        });
        continue;
      }

      tracing::debug!(host = %host.address, step = %cmd.name, "running remote command");
      match self.run_ssh(host, &cmd.command, elevate) {
        Ok(mut out) => {
          out.name = cmd.name.clone();
          outputs.push(out);
        }
        Err(error) => {
          tracing::warn!(host = %host.address, step = %cmd.name, error = %format!("{error:#}"), "remote command failed");
          return Err(anyhow::Error::new(StepFailure {
            step: cmd.name.clone(),
            error,
          }));
        }
      }
    }
    Ok(outputs)
  }
}

impl FilePusher for SshTransport {
  fn copy_file(
    &self,
    host: &Host,
    local: &Path,
    remote: &str,
    owner: &str,
    mode: u32,
    elevate: bool,
  ) -> anyhow::Result<()> {
    if runtime::is_dry_run() {
      tracing::warn!(
        host = %host.address,
        local = %local.display(),
        remote = %remote,
        "DRY-RUN: would copy file"
      );
      return Ok(());
    }

    let staged = format!(
      "{}/probe-{}",
      self.cfg.remote_tmp_dir.trim_end_matches('/'),
      uuid::Uuid::new_v4()
    );

    let mut scp_args = self.common_options();
    scp_args.push("-P".to_string());
    scp_args.push(host.port.to_string());
    scp_args.push(local.display().to_string());
    scp_args.push(format!("{}@{}:{}", host.user, host.address, staged));

    let output = Command::new(&self.cfg.scp_binary)
      .args(&scp_args)
      .output()
      .with_context(|| format!("run {}", self.cfg.scp_binary))?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(anyhow::anyhow!(
        "scp to {} failed ({}): {}",
        host.address,
        output.status,
        stderr.trim()
      ));
    }

    let install = install_command(&staged, remote, owner, mode);
    self
      .run_ssh(host, &install, elevate)
      .with_context(|| format!("install {remote}"))?;
    Ok(())
  }
}

/// Moves the staged upload into place with its final owner and mode, always removing the
/// staged copy.
fn install_command(staged: &str, remote: &str, owner: &str, mode: u32) -> String {
  format!(
    "install -D -o {owner} -m {mode:04o} {src} {dst}; rc=$?; rm -f {src}; exit $rc",
    owner = shell_quote(owner),
    src = shell_quote(staged),
    dst = shell_quote(remote),
  )
}

/// Single-quotes `raw` for a POSIX shell.
pub fn shell_quote(raw: &str) -> String {
  format!("'{}'", raw.replace('\'', r"'\''"))
}
