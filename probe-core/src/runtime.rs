use std::sync::atomic::{AtomicBool, Ordering};

pub const DRY_RUN_ENV: &str = "PROBE_MANAGER_DRY_RUN";

static DRY_RUN: AtomicBool = AtomicBool::new(false);

/// Dry-run keeps every remote command and copy local: they are logged, not executed.
/// Enabled by `--dry-run` or by `PROBE_MANAGER_DRY_RUN=1`.
pub fn configure(args: &[String]) -> bool {
  let from_env = std::env::var(DRY_RUN_ENV)
    .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
    .unwrap_or(false);
  let enabled = from_env || args.iter().any(|arg| arg == "--dry-run");
  DRY_RUN.store(enabled, Ordering::SeqCst);
  enabled
}

pub fn is_dry_run() -> bool {
  DRY_RUN.load(Ordering::SeqCst)
}
