use anyhow::Context;
use std::path::Path;
use std::process::Command;

use crate::config::EngineConfig;

pub(crate) struct EngineRun {
  pub success: bool,
  pub status: String,
  pub stdout: String,
  pub stderr: String,
}

impl EngineRun {
  pub fn output_contains(&self, marker: &str) -> bool {
    self.stdout.contains(marker) || self.stderr.contains(marker)
  }

  /// Best text to show an operator: stderr when the engine wrote any, stdout otherwise.
  pub fn diagnostics(&self) -> String {
    let err = self.stderr.trim();
    if !err.is_empty() {
      return err.to_string();
    }
    let out = self.stdout.trim();
    if !out.is_empty() {
      return out.to_string();
    }
    format!("engine exited with {}", self.status)
  }
}

pub(crate) fn run(cfg: &EngineConfig, args: &[String], cwd: &Path) -> anyhow::Result<EngineRun> {
  let output = Command::new(&cfg.binary)
    .args(&cfg.leading_args)
    .args(args)
    .current_dir(cwd)
    .output()
    .with_context(|| format!("run {}", cfg.binary))?;

  tracing::debug!(
    binary = %cfg.binary,
    status = %output.status,
    "engine run finished"
  );

  Ok(EngineRun {
    success: output.status.success(),
    status: output.status.to_string(),
    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
  })
}
