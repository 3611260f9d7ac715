pub mod catalog;
pub mod compiler;
pub mod config;
pub mod console;
pub mod daemon;
pub mod deploy;
pub mod error;
pub mod feed_sync;
pub mod intel;
pub mod job_store;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod paths;
pub mod remote;
pub mod runtime;
pub mod scheduler;
pub mod templates;
pub mod types;
pub mod validator;
pub mod workspace;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let dry_run = runtime::configure(args);
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let cfg = if dry_run {
    config::load_or_default_readonly(&config_path)?
  } else {
    config::load_or_create_default(&config_path)?
  };

  let console_command = args.iter().any(|a| {
    matches!(
      a.as_str(),
      "--instance" | "--feed" | "--jobs" | "--validate" | "--import" | "--help" | "-h"
    )
  });
  let target = if console_command {
    logging::LogTarget::FileAndStderr
  } else {
    logging::LogTarget::FileOnly
  };
  logging::init(&paths::logs_dir(&base), &cfg.logging, target)?;
  if dry_run {
    tracing::warn!("dry-run enabled: remote commands and copies are logged, not executed");
  }

  let jobs = Arc::new(scheduler::JobTable::open(&paths::schedule_path(&base))?);
  let manager = Arc::new(manager::ProbeManager::open(&cfg, &base, jobs.clone())?);

  match console::run_console_command(&cfg, &base, &manager, args)? {
    console::ConsoleAction::ExitOk => return Ok(()),
    console::ConsoleAction::RunDaemon => {}
  }

  if !cfg.scheduler.enabled {
    tracing::warn!("scheduler disabled in config; nothing to run");
    return Ok(());
  }

  tracing::info!(base = %base.display(), "starting probe manager daemon");
  let (stop_tx, stop_rx) = mpsc::channel::<()>();

  let ctrlc_tx = stop_tx.clone();
  ctrlc::set_handler(move || {
    let _ = ctrlc_tx.send(());
  })?;

  daemon::Daemon::new(manager, jobs).run(stop_rx, Duration::from_secs(cfg.scheduler.tick_seconds))?;
  tracing::info!("daemon stopped");
  Ok(())
}
