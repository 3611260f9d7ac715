use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "PROBE_MANAGER_HOME";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  match std::env::var(HOME_ENV) {
    Ok(v) if !v.trim().is_empty() => Ok(PathBuf::from(v)),
    _ => Ok(PathBuf::from("/var/lib/probe-manager")),
  }
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn catalog_path(base: &Path) -> PathBuf {
  base.join("catalog.json")
}

pub fn schedule_path(base: &Path) -> PathBuf {
  base.join("schedule.toml")
}

pub fn job_runs_dir(base: &Path) -> PathBuf {
  base.join("jobs")
}

pub fn workspace_dir(base: &Path) -> PathBuf {
  base.join("work")
}

pub fn templates_dir(base: &Path) -> PathBuf {
  base.join("templates")
}
