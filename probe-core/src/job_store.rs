use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::runtime;
use crate::types::now_unix_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Completed,
  Error,
}

/// One execution of a periodic or console-triggered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
  pub run_id: String,
  pub job_name: String,
  pub status: JobStatus,
  pub message: String,
  pub started_at_unix_ms: u64,
  pub completed_at_unix_ms: u64,
}

impl JobRecord {
  pub fn finish(job_name: &str, started_at_unix_ms: u64, ok: bool, message: String) -> Self {
    Self {
      run_id: uuid::Uuid::new_v4().to_string(),
      job_name: job_name.to_string(),
      status: if ok { JobStatus::Completed } else { JobStatus::Error },
      message,
      started_at_unix_ms,
      completed_at_unix_ms: now_unix_ms(),
    }
  }
}

pub fn store_record(dir: &Path, record: &JobRecord) -> anyhow::Result<PathBuf> {
  let file_path = dir.join(format!("{}.toml", record.run_id));

  if runtime::is_dry_run() {
    tracing::warn!(
      run_id = %record.run_id,
      job = %record.job_name,
      status = ?record.status,
      "DRY-RUN: would store job record"
    );
    return Ok(file_path);
  }

  fs::create_dir_all(dir)?;
  let raw = toml::to_string_pretty(record)?;
  write_atomic(&file_path, &raw)?;
  Ok(file_path)
}

/// Most recent records first, by completion time. Unreadable files are skipped.
pub fn list_recent(dir: &Path, limit: usize) -> anyhow::Result<Vec<JobRecord>> {
  if !dir.exists() {
    return Ok(Vec::new());
  }

  let mut out: Vec<JobRecord> = fs::read_dir(dir)?
    .flatten()
    .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("toml"))
    .filter_map(|e| fs::read_to_string(e.path()).ok())
    .filter_map(|raw| toml::from_str(&raw).ok())
    .collect();

  out.sort_by(|a, b| b.completed_at_unix_ms.cmp(&a.completed_at_unix_ms));
  out.truncate(limit);
  Ok(out)
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));
  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(name: &str, completed: u64, ok: bool) -> JobRecord {
    JobRecord {
      completed_at_unix_ms: completed,
      ..JobRecord::finish(name, completed - 5, ok, "done".into())
    }
  }

  #[test]
  fn recent_records_are_newest_first_and_limited() {
    let dir = tempfile::tempdir().unwrap();
    store_record(dir.path(), &record("a_check_task", 100, true)).unwrap();
    store_record(dir.path(), &record("b_check_task", 300, false)).unwrap();
    store_record(dir.path(), &record("c_check_task", 200, true)).unwrap();
    fs::write(dir.path().join("junk.toml"), "not = [valid").unwrap();

    let recent = list_recent(dir.path(), 2).unwrap();
    let names: Vec<&str> = recent.iter().map(|r| r.job_name.as_str()).collect();
    assert_eq!(names, ["b_check_task", "c_check_task"]);
    assert_eq!(recent[0].status, JobStatus::Error);
  }

  #[test]
  fn missing_directory_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(list_recent(&dir.path().join("jobs"), 10).unwrap().is_empty());
  }
}
