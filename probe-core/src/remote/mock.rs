use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use super::{CommandOutput, CommandRunner, FilePusher, NamedCommand, StepFailure};
use crate::catalog::Host;
use crate::lifecycle::INSTALLED_MARKER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
  pub host: String,
  pub steps: Vec<String>,
  pub elevate: bool,
}

/// Records every command list it is asked to run. `make_install` flips the engine to
/// installed, and `probe_binary` reports whether it has.
#[derive(Default)]
pub struct FakeRunner {
  calls: Mutex<Vec<RecordedCall>>,
  failing_steps: Mutex<HashSet<String>>,
  failing_hosts: Mutex<HashSet<String>>,
  responses: Mutex<HashMap<String, String>>,
  installed: Mutex<bool>,
}

impl FakeRunner {
  pub fn installed() -> Self {
    let runner = Self::default();
    *runner.installed.lock().unwrap() = true;
    runner
  }

  pub fn fail_on(&self, step: &str) {
    self.failing_steps.lock().unwrap().insert(step.to_string());
  }

  pub fn fail_host(&self, address: &str) {
    self.failing_hosts.lock().unwrap().insert(address.to_string());
  }

  pub fn respond(&self, step: &str, stdout: &str) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(step.to_string(), stdout.to_string());
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  /// Every step name that ran, across all calls, in order.
  pub fn steps(&self) -> Vec<String> {
    self.calls().into_iter().flat_map(|c| c.steps).collect()
  }
}

impl CommandRunner for FakeRunner {
  fn execute(
    &self,
    host: &Host,
    commands: &[NamedCommand],
    elevate: bool,
  ) -> anyhow::Result<Vec<CommandOutput>> {
    let mut call = RecordedCall {
      host: host.address.clone(),
      steps: Vec::new(),
      elevate,
    };
    let mut outputs = Vec::new();
    let mut failure = None;
    for cmd in commands {
      call.steps.push(cmd.name.clone());
      let host_down = self.failing_hosts.lock().unwrap().contains(&host.address);
      let step_fails = self.failing_steps.lock().unwrap().contains(&cmd.name);
      if host_down || step_fails {
        failure = Some(StepFailure {
          step: cmd.name.clone(),
          error: anyhow::anyhow!("fake failure of {}", cmd.name),
        });
        break;
      }
      if cmd.name == "make_install" {
        *self.installed.lock().unwrap() = true;
      }
      let stdout = if cmd.name == "probe_binary" {
        let installed = *self.installed.lock().unwrap();
        let marker = if installed { INSTALLED_MARKER } else { "absent" };
        format!("{marker}\n")
      } else {
        self
          .responses
          .lock()
          .unwrap()
          .get(&cmd.name)
          .cloned()
          .unwrap_or_default()
      };
      outputs.push(CommandOutput {
        name: cmd.name.clone(),
        stdout,
        stderr: String::new(),
      });
    }
    self.calls.lock().unwrap().push(call);
    match failure {
      Some(f) => Err(anyhow::Error::new(f)),
      None => Ok(outputs),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCopy {
  pub remote: String,
  pub contents: String,
  pub owner: String,
  pub mode: u32,
}

#[derive(Default)]
pub struct FakePusher {
  copies: Mutex<Vec<RecordedCopy>>,
  attempts: Mutex<Vec<String>>,
  failing: Mutex<HashSet<String>>,
}

impl FakePusher {
  pub fn fail_on(&self, remote: &str) {
    self.failing.lock().unwrap().insert(remote.to_string());
  }

  pub fn copies(&self) -> Vec<RecordedCopy> {
    self.copies.lock().unwrap().clone()
  }

  pub fn attempts(&self) -> Vec<String> {
    self.attempts.lock().unwrap().clone()
  }
}

impl FilePusher for FakePusher {
  fn copy_file(
    &self,
    _host: &Host,
    local: &Path,
    remote: &str,
    owner: &str,
    mode: u32,
    _elevate: bool,
  ) -> anyhow::Result<()> {
    self.attempts.lock().unwrap().push(remote.to_string());
    if self.failing.lock().unwrap().contains(remote) {
      anyhow::bail!("permission denied writing {remote}");
    }
    let contents = std::fs::read_to_string(local)?;
    self.copies.lock().unwrap().push(RecordedCopy {
      remote: remote.to_string(),
      contents,
      owner: owner.to_string(),
      mode,
    });
    Ok(())
  }
}
