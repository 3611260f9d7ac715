use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::catalog::RuleKind;
use crate::config::Config;
use crate::error::ProbeError;
use crate::job_store;
use crate::lifecycle::StatusReport;
use crate::manager::ProbeManager;
use crate::runtime;
use crate::types::OpResult;
use crate::validator::RuleValidator;

pub enum ConsoleAction {
  RunDaemon,
  ExitOk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstanceAction {
  Install,
  Update,
  Start,
  Stop,
  Restart,
  Reload,
  Status,
  Uptime,
  Check,
  Test,
  DeployRules,
  DeployConfig,
  DeployIntel,
}

impl InstanceAction {
  fn parse(raw: &str) -> Option<Self> {
    Some(match raw {
      "install" => Self::Install,
      "update" => Self::Update,
      "start" => Self::Start,
      "stop" => Self::Stop,
      "restart" => Self::Restart,
      "reload" => Self::Reload,
      "status" => Self::Status,
      "uptime" => Self::Uptime,
      "check" => Self::Check,
      "test" => Self::Test,
      "deploy-rules" => Self::DeployRules,
      "deploy-config" => Self::DeployConfig,
      "deploy-intel" => Self::DeployIntel,
      _ => return None,
    })
  }
}

pub fn run_console_command(
  cfg: &Config,
  base: &Path,
  manager: &ProbeManager,
  args: &[String],
) -> anyhow::Result<ConsoleAction> {
  let args = strip_console_flag(args);

  if args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(ConsoleAction::ExitOk);
  }

  if let Some(i) = args.iter().position(|a| a == "--instance") {
    return run_instance(manager, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--feed") {
    return run_feed(manager, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--jobs") {
    return run_jobs(manager, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--validate") {
    return run_validate(cfg, base, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--import") {
    return run_import(manager, &args[i + 1..]);
  }

  Ok(ConsoleAction::RunDaemon)
}

fn run_instance(manager: &ProbeManager, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let name = tail.first().map(|s| s.as_str()).unwrap_or("");
  let action = tail.get(1).and_then(|s| InstanceAction::parse(s));
  let (name, action) = match (name, action) {
    ("", _) | (_, None) => {
      eprintln!("expected: --instance <name> <action>");
      print_help();
      return Ok(ConsoleAction::ExitOk);
    }
    (name, Some(action)) => (name, action),
  };
  let version = tail.get(2).map(|s| s.as_str());

  match action {
    InstanceAction::Install => report_op(manager.install(name, version)),
    InstanceAction::Update => report_op(manager.update(name, version)),
    InstanceAction::Start => report_op(manager.start(name)),
    InstanceAction::Stop => report_op(manager.stop(name)),
    InstanceAction::Restart => report_op(manager.restart(name)),
    InstanceAction::Reload => report_op(manager.reload(name)),
    InstanceAction::Test => report_op(manager.test_rules(name)),
    InstanceAction::DeployRules => report_op(manager.deploy_rules(name)),
    InstanceAction::DeployConfig => report_op(manager.deploy_config(name)),
    InstanceAction::DeployIntel => report_op(manager.deploy_intel(name)),
    InstanceAction::Status => report_status(manager.status(name)),
    InstanceAction::Uptime => report_status(manager.uptime(name)),
    InstanceAction::Check => report_status(manager.check(name)),
  }
}

fn run_feed(manager: &ProbeManager, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let key = tail.first().map(|s| s.as_str()).unwrap_or("");
  let sub = tail.get(1).map(|s| s.as_str()).unwrap_or("");
  if key.is_empty() {
    anyhow::bail!("expected: --feed <api_key> pull|list");
  }

  match sub {
    "pull" => report_op(manager.pull_feed(key)),
    "list" => {
      let list = manager.list_feeds(key);
      if !list.ok {
        return fail_with(&list.errors);
      }
      if list.feeds.is_empty() {
        println!("No feeds subscribed.");
      }
      for feed in list.feeds {
        println!("- {feed}");
      }
      Ok(ConsoleAction::ExitOk)
    }
    _ => {
      eprintln!("Unknown `--feed` subcommand. Expected: <api_key> pull|list");
      print_help();
      Ok(ConsoleAction::ExitOk)
    }
  }
}

fn run_jobs(manager: &ProbeManager, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let sub = tail.first().map(|s| s.as_str()).unwrap_or("");
  match sub {
    "recent" => {
      let Some(dir) = manager.job_runs_dir() else {
        println!("Job runs are not recorded.");
        return Ok(ConsoleAction::ExitOk);
      };
      let limit = parse_limit(tail).unwrap_or(10);
      let items = job_store::list_recent(dir, limit)?;
      if items.is_empty() {
        println!("No job runs found.");
        return Ok(ConsoleAction::ExitOk);
      }

      println!("Last {}/{} job runs:", items.len(), limit);
      for it in items {
        println!(
          "- {} {} status={:?} completed_at_unix_ms={} {}",
          it.run_id, it.job_name, it.status, it.completed_at_unix_ms, it.message
        );
      }
      Ok(ConsoleAction::ExitOk)
    }
    "scheduled" => {
      let names = manager.scheduler().job_names();
      if names.is_empty() {
        println!("No jobs scheduled.");
      }
      for name in names {
        println!("- {name}");
      }
      Ok(ConsoleAction::ExitOk)
    }
    _ => {
      eprintln!("Unknown `--jobs` subcommand. Expected: recent [--limit N]|scheduled");
      print_help();
      Ok(ConsoleAction::ExitOk)
    }
  }
}

fn run_validate(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let kind = match tail.first().map(|s| s.as_str()) {
    Some("sig" | "signature") => RuleKind::Signature,
    Some("script" | "bro") => RuleKind::Script,
    _ => anyhow::bail!("expected: --validate <sig|script> <file>"),
  };
  let file = tail
    .get(1)
    .map(Path::new)
    .ok_or_else(|| anyhow::anyhow!("expected: --validate <sig|script> <file>"))?;
  let body = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
  let key = file
    .file_stem()
    .map(|s| s.to_string_lossy().to_string())
    .unwrap_or_else(|| "rule".to_string());

  let validator = RuleValidator::new(cfg.engine.clone(), cfg.workspace_root(base));
  let report = validator.validate(kind, &key, &body);
  if report.ok {
    println!("{kind} {} is valid.", file.display());
    return Ok(ConsoleAction::ExitOk);
  }
  eprintln!("{}", report.diagnostics);
  anyhow::bail!("{kind} {} failed validation", file.display())
}

fn run_import(manager: &ProbeManager, tail: &[String]) -> anyhow::Result<ConsoleAction> {
  let file = tail
    .first()
    .map(Path::new)
    .ok_or_else(|| anyhow::anyhow!("expected: --import <file> [--ruleset NAME]..."))?;
  let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
  let rulesets = parse_rulesets(tail);

  if runtime::is_dry_run() {
    println!(
      "DRY-RUN: would import {} lines from {}.",
      text.lines().filter(|l| !l.trim().is_empty()).count(),
      file.display()
    );
    return Ok(ConsoleAction::ExitOk);
  }

  let mut created = 0;
  let mut updated = 0;
  let mut errors = Vec::new();
  for result in manager.import_signatures(&text, &rulesets) {
    match result {
      Ok(o) if o.created => created += 1,
      Ok(_) => updated += 1,
      Err(e) => errors.push(e),
    }
  }
  println!("Imported signatures: {created} created, {updated} updated.");
  if errors.is_empty() {
    Ok(ConsoleAction::ExitOk)
  } else {
    fail_with(&errors)
  }
}

fn report_op(res: OpResult) -> anyhow::Result<ConsoleAction> {
  if res.ok {
    println!("OK");
    return Ok(ConsoleAction::ExitOk);
  }
  fail_with(&res.errors)
}

fn report_status(report: StatusReport) -> anyhow::Result<ConsoleAction> {
  if !report.status.is_empty() {
    println!("{}", report.status);
  }
  if report.ok {
    return Ok(ConsoleAction::ExitOk);
  }
  fail_with(&report.errors)
}

fn fail_with(errors: &[ProbeError]) -> anyhow::Result<ConsoleAction> {
  for e in errors {
    eprintln!("error: {e}");
  }
  anyhow::bail!("{} error(s)", errors.len())
}

fn parse_limit(args: &[String]) -> Option<usize> {
  args
    .iter()
    .position(|a| a == "--limit")
    .and_then(|i| args.get(i + 1))
    .and_then(|s| s.parse::<usize>().ok())
}

fn parse_rulesets(args: &[String]) -> Vec<String> {
  args
    .windows(2)
    .filter(|w| w[0] == "--ruleset")
    .map(|w| w[1].clone())
    .collect()
}

fn strip_console_flag(args: &[String]) -> Vec<String> {
  args
    .iter()
    .filter(|a| a.as_str() != "--console" && a.as_str() != "--dry-run")
    .cloned()
    .collect()
}

fn print_help() {
  println!("probe-core v{} (console mode)", env!("CARGO_PKG_VERSION"));
  println!("Commands:");
  println!("  --dry-run (global; logs remote actions without running them)");
  println!("  --instance <name> install|update [version]");
  println!("  --instance <name> start|stop|restart|reload");
  println!("  --instance <name> status|uptime|check");
  println!("  --instance <name> test|deploy-rules|deploy-config|deploy-intel");
  println!("  --feed <api_key> pull|list");
  println!("  --jobs recent [--limit N]");
  println!("  --jobs scheduled");
  println!("  --validate <sig|script> <file>");
  println!("  --import <file> [--ruleset NAME]...");
  println!("Without a command the scheduler daemon runs until Ctrl-C.");
}
