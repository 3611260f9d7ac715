use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::job_store::JobStatus;
use crate::manager::ProbeManager;
use crate::scheduler::JobTable;

/// Ticks the job table and runs whatever is due until a stop signal arrives.
pub struct Daemon {
  manager: Arc<ProbeManager>,
  jobs: Arc<JobTable>,
}

impl Daemon {
  pub fn new(manager: Arc<ProbeManager>, jobs: Arc<JobTable>) -> Self {
    Self { manager, jobs }
  }

  pub fn run(&self, stop_rx: mpsc::Receiver<()>, tick: Duration) -> anyhow::Result<()> {
    tracing::info!(
      jobs = self.jobs.jobs().len(),
      tick_seconds = tick.as_secs(),
      "scheduler loop started"
    );

    loop {
      if stop_rx.recv_timeout(tick).is_ok() {
        break;
      }
      self.tick();
    }

    tracing::info!("scheduler loop exiting");
    Ok(())
  }

  /// One pass: every due job runs to completion before the next one starts.
  pub fn tick(&self) -> usize {
    let due = match self.jobs.take_due(Utc::now()) {
      Ok(due) => due,
      Err(e) => {
        tracing::error!(error = %format!("{e:#}"), "failed to read due jobs");
        return 0;
      }
    };

    let mut failed = 0;
    for job in &due {
      if self.manager.run_job(job).status == JobStatus::Error {
        failed += 1;
      }
    }
    if !due.is_empty() {
      tracing::info!(ran = due.len(), failed, "scheduler tick");
    }
    due.len()
  }
}
