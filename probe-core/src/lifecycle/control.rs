use std::sync::Arc;

use super::provision;
use crate::catalog::{Host, RemotePaths};
use crate::error::ProbeError;
use crate::remote::{remote_error, shell_quote, CommandRunner, NamedCommand};

pub(crate) const INSTALLED_MARKER: &str = "present";

pub trait Installable {
  /// Whether the engine binary is already present on the host. An unreachable host is an
  /// error, not an absent binary.
  fn probe_installed(&self, host: &Host) -> Result<bool, ProbeError>;
  fn install(&self, host: &Host, version: &str) -> Result<(), ProbeError>;
}

pub trait Startable {
  fn start(&self, host: &Host) -> Result<(), ProbeError>;
  fn stop(&self, host: &Host) -> Result<(), ProbeError>;
  fn restart(&self, host: &Host) -> Result<(), ProbeError>;
  fn status(&self, host: &Host) -> Result<String, ProbeError>;
}

pub trait Reloadable {
  fn reload(&self, host: &Host) -> Result<(), ProbeError>;
}

pub trait EngineControl: Installable + Startable + Reloadable {}

impl<T: Installable + Startable + Reloadable> EngineControl for T {}

/// Drives a Bro installation through `broctl`.
pub struct BroControl {
  runner: Arc<dyn CommandRunner>,
  paths: RemotePaths,
}

impl BroControl {
  pub fn new(runner: Arc<dyn CommandRunner>, paths: RemotePaths) -> Self {
    Self { runner, paths }
  }

  fn broctl(&self, verb: &str) -> String {
    format!("{} {verb}", shell_quote(&self.paths.control_binary()))
  }

  fn run(&self, host: &Host, commands: &[NamedCommand]) -> Result<Vec<String>, ProbeError> {
    let fallback = commands.first().map(|c| c.name.as_str()).unwrap_or("remote");
    match self.runner.execute(host, commands, true) {
      Ok(outputs) => Ok(outputs.into_iter().map(|o| o.stdout).collect()),
      Err(e) => Err(remote_error(host, fallback, &e)),
    }
  }
}

impl Installable for BroControl {
  fn probe_installed(&self, host: &Host) -> Result<bool, ProbeError> {
    let probe = NamedCommand::new(
      "probe_binary",
      format!(
        "if test -x {}; then echo {INSTALLED_MARKER}; else echo absent; fi",
        shell_quote(&self.paths.engine_binary())
      ),
    );
    let out = self.run(host, &[probe])?;
    Ok(out.iter().any(|o| o.trim() == INSTALLED_MARKER))
  }

  fn install(&self, host: &Host, version: &str) -> Result<(), ProbeError> {
    let os = host
      .os_family()
      .ok_or_else(|| ProbeError::UnsupportedOs(host.os.clone()))?;
    let steps = provision::install_steps(os, version, &self.paths)?;
    self.run(host, &steps).map(|_| ())
  }
}

impl Startable for BroControl {
  fn start(&self, host: &Host) -> Result<(), ProbeError> {
    self
      .run(host, &[NamedCommand::new("start", self.broctl("start"))])
      .map(|_| ())
  }

  fn stop(&self, host: &Host) -> Result<(), ProbeError> {
    self
      .run(host, &[NamedCommand::new("stop", self.broctl("stop"))])
      .map(|_| ())
  }

  /// Stop, then deploy: the engine comes back with whatever configuration is on disk.
  fn restart(&self, host: &Host) -> Result<(), ProbeError> {
    let steps = [
      NamedCommand::new("stop", self.broctl("stop")),
      NamedCommand::new("deploy", self.broctl("deploy")),
    ];
    self.run(host, &steps).map(|_| ())
  }

  fn status(&self, host: &Host) -> Result<String, ProbeError> {
    let out = self.run(
      host,
      &[NamedCommand::new("status", format!("{} | sed -n 2p", self.broctl("status")))],
    )?;
    Ok(out.into_iter().next().unwrap_or_default().trim().to_string())
  }
}

impl Reloadable for BroControl {
  fn reload(&self, host: &Host) -> Result<(), ProbeError> {
    self
      .run(host, &[NamedCommand::new("deploy", self.broctl("deploy"))])
      .map(|_| ())
  }
}
