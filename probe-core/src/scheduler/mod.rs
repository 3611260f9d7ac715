mod crontab;

pub use crontab::{Crontab, CrontabError};

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::catalog::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTask {
  DeployRules { instance: EntityId },
  CheckInstance { instance: EntityId },
  PullFeed { api_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicJob {
  pub name: String,
  pub schedule: Crontab,
  /// Minute (unix seconds / 60) of the last dispatch, so a job fires at most once per minute.
  #[serde(default)]
  pub last_run_minute: Option<i64>,
  pub task: JobTask,
}

impl PeriodicJob {
  pub fn new(name: String, schedule: Crontab, task: JobTask) -> Self {
    Self {
      name,
      schedule,
      last_run_minute: None,
      task,
    }
  }
}

pub fn deploy_rules_job_name(instance: &str, schedule: &Crontab) -> String {
  format!("{instance}_deploy_rules_{schedule}")
}

pub fn check_job_name(instance: &str) -> String {
  format!("{instance}_check_task")
}

pub fn feed_job_name(api_key: &str) -> String {
  format!("{api_key}_deploy_critical_stack")
}

/// Periodic-task registry. Names are unique; registering an existing name replaces it.
pub trait Scheduler: Send + Sync {
  fn register(&self, job: PeriodicJob) -> anyhow::Result<()>;
  fn deregister(&self, name: &str) -> anyhow::Result<bool>;
  fn job_names(&self) -> Vec<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobFile {
  #[serde(default)]
  jobs: Vec<PeriodicJob>,
}

/// Longest stretch of missed minutes a late tick still evaluates.
const CATCH_UP_MINUTES: i64 = 60;

/// In-process job table, persisted as TOML after every change when backed by a file.
pub struct JobTable {
  path: Option<PathBuf>,
  jobs: Mutex<BTreeMap<String, PeriodicJob>>,
  last_tick_minute: Mutex<Option<i64>>,
}

impl JobTable {
  pub fn in_memory() -> Self {
    Self {
      path: None,
      jobs: Mutex::new(BTreeMap::new()),
      last_tick_minute: Mutex::new(None),
    }
  }

  pub fn open(path: &Path) -> anyhow::Result<Self> {
    let jobs = if path.exists() {
      let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
      let file: JobFile =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
      file.jobs.into_iter().map(|j| (j.name.clone(), j)).collect()
    } else {
      BTreeMap::new()
    };
    Ok(Self {
      path: Some(path.to_path_buf()),
      jobs: Mutex::new(jobs),
      last_tick_minute: Mutex::new(None),
    })
  }

  pub fn jobs(&self) -> Vec<PeriodicJob> {
    self.lock().values().cloned().collect()
  }

  /// Jobs whose schedule matched any minute since the previous call, up to `now`, and
  /// that have not been dispatched since. A job that matched several of those minutes is
  /// returned once. The first call only looks at the current minute, and a gap longer
  /// than `CATCH_UP_MINUTES` is only evaluated for its most recent minutes.
  /// The returned jobs are marked as run.
  pub fn take_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<PeriodicJob>> {
    let minute = now.timestamp().div_euclid(60);
    let earliest = {
      let mut last = self
        .last_tick_minute
        .lock()
        .unwrap_or_else(|p| p.into_inner());
      let earliest = match *last {
        Some(prev) if prev < minute => (prev + 1).max(minute - CATCH_UP_MINUTES + 1),
        _ => minute,
      };
      *last = Some(minute);
      earliest
    };
    if earliest < minute {
      tracing::debug!(missed_minutes = minute - earliest, "evaluating delayed scheduler minutes");
    }

    let mut jobs = self.lock();
    let mut next = jobs.clone();
    let mut due = Vec::new();
    for job in next.values_mut() {
      let from = match job.last_run_minute {
        Some(run) => earliest.max(run + 1),
        None => earliest,
      };
      if !(from..=minute).any(|m| matches_minute(&job.schedule, m)) {
        continue;
      }
      job.last_run_minute = Some(minute);
      due.push(job.clone());
    }
    if !due.is_empty() {
      self.persist(&next)?;
      *jobs = next;
    }
    Ok(due)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, PeriodicJob>> {
    self.jobs.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn persist(&self, jobs: &BTreeMap<String, PeriodicJob>) -> anyhow::Result<()> {
    let Some(path) = self.path.as_deref() else {
      return Ok(());
    };
    let parent = path
      .parent()
      .ok_or_else(|| anyhow::anyhow!("schedule path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let file = JobFile {
      jobs: jobs.values().cloned().collect(),
    };
    let tmp = parent.join(".schedule.toml.tmp");
    fs::write(&tmp, toml::to_string_pretty(&file)?)
      .with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
  }
}

fn matches_minute(schedule: &Crontab, minute: i64) -> bool {
  Utc
    .timestamp_opt(minute * 60, 0)
    .single()
    .is_some_and(|at| schedule.matches(at))
}

impl Scheduler for JobTable {
  fn register(&self, job: PeriodicJob) -> anyhow::Result<()> {
    let mut jobs = self.lock();
    let mut next = jobs.clone();
    let (name, schedule) = (job.name.clone(), job.schedule.to_string());
    next.insert(job.name.clone(), job);
    self.persist(&next)?;
    *jobs = next;
    tracing::info!(job = %name, schedule = %schedule, "periodic job registered");
    Ok(())
  }

  fn deregister(&self, name: &str) -> anyhow::Result<bool> {
    let mut jobs = self.lock();
    if !jobs.contains_key(name) {
      return Ok(false);
    }
    let mut next = jobs.clone();
    next.remove(name);
    self.persist(&next)?;
    *jobs = next;
    tracing::info!(job = %name, "periodic job removed");
    Ok(true)
  }

  fn job_names(&self) -> Vec<String> {
    self.lock().keys().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn every(n: u32) -> Crontab {
    Crontab::every_minutes(n)
  }

  #[test]
  fn job_names_follow_fixed_patterns() {
    let c: Crontab = "0 3 * * *".parse().unwrap();
    assert_eq!(deploy_rules_job_name("sensor-1", &c), "sensor-1_deploy_rules_0 3 * * *");
    assert_eq!(check_job_name("sensor-1"), "sensor-1_check_task");
    assert_eq!(feed_job_name("KEY"), "KEY_deploy_critical_stack");
  }

  #[test]
  fn failed_write_leaves_table_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("blocker"), "").unwrap();
    let table = JobTable::open(&dir.path().join("blocker").join("schedule.toml")).unwrap();
    let job = PeriodicJob::new(check_job_name("s1"), every(5), JobTask::CheckInstance { instance: 1 });
    assert!(table.register(job).is_err());
    assert!(table.job_names().is_empty());
  }

  #[test]
  fn due_jobs_fire_once_per_minute() {
    let table = JobTable::in_memory();
    table
      .register(PeriodicJob::new(
        check_job_name("s1"),
        every(5),
        JobTask::CheckInstance { instance: 1 },
      ))
      .unwrap();
    let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 12, 10, 0).unwrap();
    assert_eq!(table.take_due(t0).unwrap().len(), 1);
    assert!(table.take_due(t0 + chrono::Duration::seconds(30)).unwrap().is_empty());
    assert!(table.take_due(t0 + chrono::Duration::minutes(1)).unwrap().is_empty());
    assert_eq!(table.take_due(t0 + chrono::Duration::minutes(5)).unwrap().len(), 1);
  }

  #[test]
  fn delayed_tick_still_fires_missed_minute() {
    let table = JobTable::in_memory();
    let nightly: Crontab = "0 3 * * *".parse().unwrap();
    table
      .register(PeriodicJob::new(
        deploy_rules_job_name("s1", &nightly),
        nightly,
        JobTask::DeployRules { instance: 1 },
      ))
      .unwrap();
    let before = Utc.with_ymd_and_hms(2026, 5, 1, 2, 59, 30).unwrap();
    assert!(table.take_due(before).unwrap().is_empty());
    let late = Utc.with_ymd_and_hms(2026, 5, 1, 3, 1, 5).unwrap();
    assert_eq!(table.take_due(late).unwrap().len(), 1);
    assert!(table.take_due(late + chrono::Duration::minutes(1)).unwrap().is_empty());
  }

  #[test]
  fn catch_up_is_bounded() {
    let table = JobTable::in_memory();
    let nightly: Crontab = "0 3 * * *".parse().unwrap();
    table
      .register(PeriodicJob::new(
        deploy_rules_job_name("s1", &nightly),
        nightly,
        JobTask::DeployRules { instance: 1 },
      ))
      .unwrap();
    assert!(table
      .take_due(Utc.with_ymd_and_hms(2026, 5, 1, 2, 0, 0).unwrap())
      .unwrap()
      .is_empty());
    assert!(table
      .take_due(Utc.with_ymd_and_hms(2026, 5, 1, 4, 30, 0).unwrap())
      .unwrap()
      .is_empty());
  }

  #[test]
  fn table_round_trips_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.toml");
    {
      let table = JobTable::open(&path).unwrap();
      table
        .register(PeriodicJob::new(
          feed_job_name("KEY"),
          every(30),
          JobTask::PullFeed { api_key: "KEY".into() },
        ))
        .unwrap();
    }
    let reopened = JobTable::open(&path).unwrap();
    let jobs = reopened.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task, JobTask::PullFeed { api_key: "KEY".into() });
    assert!(reopened.deregister(&feed_job_name("KEY")).unwrap());
    assert!(JobTable::open(&path).unwrap().jobs().is_empty());
  }
}
