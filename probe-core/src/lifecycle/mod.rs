//! Instance state machine: `Uninstalled -> Installed -> {Stopped, Running}`.
//!
//! Operations work on an `InstanceContext` resolved by the caller and record their state
//! changes (`installed`, `rules_updated_at`) on that context; persisting them is the
//! caller's job. Nothing here raises: every outcome is an `OpResult` or a report.

mod control;
mod provision;

pub use control::{BroControl, EngineControl, Installable, Reloadable, Startable};
pub(crate) use control::INSTALLED_MARKER;

use std::sync::Arc;

use crate::catalog::{EngineKind, InstanceContext, IntelIndicator, Script};
use crate::compiler;
use crate::deploy::{DeployBundle, RemoteDeployer};
use crate::error::ProbeError;
use crate::remote::CommandRunner;
use crate::templates::Templates;
use crate::types::{now_unix_ms, OpResult};
use crate::validator::RuleCheck;

pub const NOT_INSTALLED: &str = "not installed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
  pub ok: bool,
  pub status: String,
  pub errors: Vec<ProbeError>,
}

pub struct InstanceLifecycle {
  runner: Arc<dyn CommandRunner>,
  deployer: RemoteDeployer,
  checker: Arc<dyn RuleCheck>,
  templates: Arc<Templates>,
}

impl InstanceLifecycle {
  pub fn new(
    runner: Arc<dyn CommandRunner>,
    deployer: RemoteDeployer,
    checker: Arc<dyn RuleCheck>,
    templates: Arc<Templates>,
  ) -> Self {
    Self {
      runner,
      deployer,
      checker,
      templates,
    }
  }

  fn control(&self, ctx: &InstanceContext) -> Box<dyn EngineControl> {
    match ctx.instance.kind {
      EngineKind::Bro => Box::new(BroControl::new(
        self.runner.clone(),
        ctx.configuration.paths.clone(),
      )),
    }
  }

  /// Control handle for an installed instance on a supported host.
  fn ready(&self, ctx: &InstanceContext) -> Result<Box<dyn EngineControl>, ProbeError> {
    if ctx.host.os_family().is_none() {
      return Err(ProbeError::UnsupportedOs(ctx.host.os.clone()));
    }
    if !ctx.instance.installed {
      return Err(ProbeError::NotInstalled(ctx.instance.name.clone()));
    }
    Ok(self.control(ctx))
  }

  /// Installs the engine unless the host already has it.
  pub fn install(&self, ctx: &mut InstanceContext, version: &str) -> OpResult {
    let name = ctx.instance.name.clone();
    if ctx.host.os_family().is_none() {
      tracing::warn!(instance = %name, os = %ctx.host.os, "install refused: unsupported OS");
      return OpResult::failed(ProbeError::UnsupportedOs(ctx.host.os.clone()));
    }

    let control = self.control(ctx);
    match control.probe_installed(&ctx.host) {
      Ok(true) => {
        tracing::info!(instance = %name, "engine already present; nothing to install");
        ctx.instance.installed = true;
        return OpResult::success();
      }
      Ok(false) => {}
      Err(e) => {
        tracing::warn!(instance = %name, error = %e, "host unreachable; install not attempted");
        return OpResult::failed(e);
      }
    }

    tracing::info!(instance = %name, version = %version, "installing engine");
    match control.install(&ctx.host, version) {
      Ok(()) => {
        ctx.instance.installed = true;
        tracing::info!(instance = %name, version = %version, "engine installed");
        OpResult::success()
      }
      Err(e) => {
        tracing::warn!(instance = %name, error = %e, "engine install failed");
        OpResult::failed(e)
      }
    }
  }

  pub fn update(&self, ctx: &mut InstanceContext, version: &str) -> OpResult {
    self.install(ctx, version)
  }

  pub fn start(&self, ctx: &InstanceContext) -> OpResult {
    self.control_op(ctx, "start", |c, h| c.start(h))
  }

  pub fn stop(&self, ctx: &InstanceContext) -> OpResult {
    self.control_op(ctx, "stop", |c, h| c.stop(h))
  }

  pub fn restart(&self, ctx: &InstanceContext) -> OpResult {
    self.control_op(ctx, "restart", |c, h| c.restart(h))
  }

  pub fn reload(&self, ctx: &InstanceContext) -> OpResult {
    self.control_op(ctx, "reload", |c, h| c.reload(h))
  }

  fn control_op(
    &self,
    ctx: &InstanceContext,
    op: &str,
    f: impl FnOnce(&dyn EngineControl, &crate::catalog::Host) -> Result<(), ProbeError>,
  ) -> OpResult {
    let control = match self.ready(ctx) {
      Ok(c) => c,
      Err(e) => return OpResult::failed(e),
    };
    match f(control.as_ref(), &ctx.host) {
      Ok(()) => {
        tracing::info!(instance = %ctx.instance.name, op, "engine control succeeded");
        OpResult::success()
      }
      Err(e) => {
        tracing::warn!(instance = %ctx.instance.name, op, error = %e, "engine control failed");
        OpResult::failed(e)
      }
    }
  }

  pub fn status(&self, ctx: &InstanceContext) -> StatusReport {
    if !ctx.instance.installed {
      return StatusReport {
        ok: true,
        status: NOT_INSTALLED.to_string(),
        errors: Vec::new(),
      };
    }
    let control = match self.ready(ctx) {
      Ok(c) => c,
      Err(e) => return failed_status(e),
    };
    match control.status(&ctx.host) {
      Ok(status) => StatusReport {
        ok: true,
        status,
        errors: Vec::new(),
      },
      Err(e) => failed_status(e),
    }
  }

  pub fn uptime(&self, ctx: &InstanceContext) -> StatusReport {
    self.status(ctx)
  }

  /// Health check: the instance must be installed and its engine reported as running.
  pub fn check(&self, ctx: &InstanceContext) -> StatusReport {
    if !ctx.instance.installed {
      return failed_status(ProbeError::NotInstalled(ctx.instance.name.clone()));
    }
    let mut report = self.status(ctx);
    if report.ok && !report.status.to_ascii_lowercase().contains("running") {
      report.ok = false;
      report.errors.push(ProbeError::RemoteUnavailable {
        host: ctx.host.address.clone(),
        step: "status".to_string(),
        reason: format!("engine not running: `{}`", report.status),
      });
    }
    if report.ok {
      tracing::info!(instance = %ctx.instance.name, status = %report.status, "health check passed");
    } else {
      tracing::warn!(instance = %ctx.instance.name, status = %report.status, "health check failed");
    }
    report
  }

  /// Validates every enabled rule reachable from the instance's rulesets.
  pub fn test_rules(&self, ctx: &InstanceContext) -> OpResult {
    let (sigs, scripts) = compiler::enabled_rules(&ctx.rulesets);
    let mut errors = Vec::new();
    for s in sigs {
      if let Some(e) = self.checker.check_signature(s).to_error(&s.to_string()) {
        errors.push(e);
      }
    }
    for s in scripts {
      if let Some(e) = self.checker.check_script(s).to_error(&s.to_string()) {
        errors.push(e);
      }
    }
    OpResult::from_errors(errors)
  }

  /// Compiles, optionally validates, ships the rules and reloads the engine. The rules
  /// timestamp moves only when every step succeeded.
  pub fn deploy_rules(&self, ctx: &mut InstanceContext) -> OpResult {
    let name = ctx.instance.name.clone();
    let control = match self.ready(ctx) {
      Ok(c) => c,
      Err(e) => return OpResult::failed(e),
    };

    if ctx.instance.secure_deployment {
      let tested = self.test_rules(ctx);
      if !tested.ok {
        tracing::warn!(
          instance = %name,
          failures = tested.errors.len(),
          "secure deployment refused: rule validation failed"
        );
        return tested;
      }
    }

    let artifacts = compiler::compile(&ctx.rulesets);
    let bundle = DeployBundle::rules(
      format!("instance-{}", ctx.instance.id),
      &artifacts,
      &ctx.configuration.paths,
    );
    let report = self.deployer.deploy(&ctx.host, &bundle);
    if !report.ok {
      tracing::warn!(instance = %name, failed = report.errors.len(), "rules deploy incomplete; engine not reloaded");
      return OpResult::from_errors(report.errors);
    }

    if let Err(e) = control.reload(&ctx.host) {
      return OpResult::failed(e);
    }
    ctx.instance.rules_updated_at_unix_ms = Some(now_unix_ms());
    tracing::info!(instance = %name, files = report.copied.len(), "rules deployed");
    OpResult::success()
  }

  /// Ships the four configuration blobs and the intel policy, then reloads.
  pub fn deploy_config(&self, ctx: &InstanceContext) -> OpResult {
    let name = &ctx.instance.name;
    let control = match self.ready(ctx) {
      Ok(c) => c,
      Err(e) => return OpResult::failed(e),
    };

    let texts = &ctx.configuration.texts;
    if ctx.instance.secure_deployment {
      let policy = local_policy_script(ctx);
      let report = self.checker.check_script(&policy);
      if let Some(e) = report.to_error(&policy.name) {
        tracing::warn!(instance = %name, "secure deployment refused: local policy failed validation");
        return OpResult::failed(e);
      }
    }

    let intel_policy = self
      .templates
      .render_intel_policy(&ctx.configuration.paths.intel_data);
    let bundle = DeployBundle::config(
      format!("instance-{}", ctx.instance.id),
      texts,
      intel_policy,
      &ctx.configuration.paths,
    );
    let report = self.deployer.deploy(&ctx.host, &bundle);
    if !report.ok {
      tracing::warn!(instance = %name, failed = report.errors.len(), "config deploy incomplete; engine not reloaded");
      return OpResult::from_errors(report.errors);
    }
    match control.reload(&ctx.host) {
      Ok(()) => {
        tracing::info!(instance = %name, "configuration deployed");
        OpResult::success()
      }
      Err(e) => OpResult::failed(e),
    }
  }

  /// Writes every indicator into the engine's intel data file, then reloads.
  pub fn deploy_intel(&self, ctx: &InstanceContext, indicators: &[IntelIndicator]) -> OpResult {
    let control = match self.ready(ctx) {
      Ok(c) => c,
      Err(e) => return OpResult::failed(e),
    };
    let data = crate::intel::render_data_file(indicators);
    let bundle = DeployBundle::intel(
      format!("instance-{}", ctx.instance.id),
      data,
      &ctx.configuration.paths,
    );
    let report = self.deployer.deploy(&ctx.host, &bundle);
    if !report.ok {
      return OpResult::from_errors(report.errors);
    }
    match control.reload(&ctx.host) {
      Ok(()) => {
        tracing::info!(instance = %ctx.instance.name, indicators = indicators.len(), "intel deployed");
        OpResult::success()
      }
      Err(e) => OpResult::failed(e),
    }
  }
}

fn local_policy_script(ctx: &InstanceContext) -> Script {
  Script {
    id: ctx.configuration.id,
    name: format!("{} local policy", ctx.configuration.name),
    body: ctx.configuration.texts.local_policy.clone(),
    enabled: true,
    validation_capture: None,
    created_at_unix_ms: 0,
    updated_at_unix_ms: None,
  }
}

fn failed_status(e: ProbeError) -> StatusReport {
  StatusReport {
    ok: false,
    status: String::new(),
    errors: vec![e],
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::catalog::fixtures::{instance, script, sig};
  use crate::catalog::{Catalog, RemotePaths, RuleKind, Signature};
  use crate::remote::mock::{FakePusher, FakeRunner};
  use crate::validator::ValidationReport;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Fails any rule whose body contains `BROKEN` and counts how often it was asked.
  #[derive(Default)]
  pub(crate) struct FakeCheck {
    pub calls: AtomicUsize,
  }

  impl FakeCheck {
    fn judge(&self, body: &str) -> ValidationReport {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if body.contains("BROKEN") {
        ValidationReport::failed("Error in signature: BROKEN")
      } else {
        ValidationReport::passed()
      }
    }
  }

  impl RuleCheck for FakeCheck {
    fn check_signature(&self, sig: &Signature) -> ValidationReport {
      self.judge(&sig.body)
    }

    fn check_script(&self, script: &Script) -> ValidationReport {
      self.judge(&script.body)
    }
  }

  pub(crate) struct Harness {
    pub runner: Arc<FakeRunner>,
    pub pusher: Arc<FakePusher>,
    pub checker: Arc<FakeCheck>,
    pub lifecycle: InstanceLifecycle,
    _staging: tempfile::TempDir,
  }

  impl Harness {
    pub fn new(runner: FakeRunner) -> Self {
      let staging = tempfile::tempdir().unwrap();
      let runner = Arc::new(runner);
      let pusher = Arc::new(FakePusher::default());
      let checker = Arc::new(FakeCheck::default());
      let deployer = RemoteDeployer::new(
        pusher.clone(),
        staging.path().to_path_buf(),
        "root".into(),
        0o600,
      );
      let lifecycle = InstanceLifecycle::new(
        runner.clone(),
        deployer,
        checker.clone(),
        Arc::new(Templates::default()),
      );
      Self {
        runner,
        pusher,
        checker,
        lifecycle,
        _staging: staging,
      }
    }
  }

  /// Installed instance with one ruleset holding a valid signature, a broken signature
  /// and a valid script.
  fn context(secure: bool, installed: bool) -> InstanceContext {
    let mut cat = Catalog::default();
    let good = cat.add_signature(sig("good", true), 1).unwrap();
    let mut bad_draft = sig("bad", true);
    bad_draft.body = "signature bad { BROKEN }".into();
    let bad = cat.add_signature(bad_draft, 1).unwrap();
    let sc = cat.add_script(script("notice-1", true), 1).unwrap();
    let rs = cat.add_ruleset("core", "").unwrap();
    cat.add_to_ruleset(rs.id, RuleKind::Signature, good.id).unwrap();
    cat.add_to_ruleset(rs.id, RuleKind::Signature, bad.id).unwrap();
    cat.add_to_ruleset(rs.id, RuleKind::Script, sc.id).unwrap();
    let inst = instance(&mut cat, "sensor-1", vec![rs.id], secure);
    if installed {
      cat.record_install(inst.id).unwrap();
    }
    cat.resolve_instance(inst.id).unwrap()
  }

  #[test]
  fn install_is_idempotent_when_binary_present() {
    let h = Harness::new(FakeRunner::installed());
    let mut ctx = context(false, false);
    assert!(h.lifecycle.install(&mut ctx, "2.5.3").ok);
    assert!(ctx.instance.installed);
    assert!(h.lifecycle.install(&mut ctx, "2.5.3").ok);
    assert_eq!(h.runner.steps(), ["probe_binary", "probe_binary"]);
  }

  #[test]
  fn fresh_install_provisions_once() {
    let h = Harness::new(FakeRunner::default());
    let mut ctx = context(false, false);
    assert!(h.lifecycle.install(&mut ctx, "2.5.3").ok);
    assert!(ctx.instance.installed);
    assert_eq!(h.runner.calls().len(), 2);
    assert!(h.runner.calls()[1].elevate);

    assert!(h.lifecycle.update(&mut ctx, "2.5.3").ok);
    assert_eq!(h.runner.calls().len(), 3);
    assert_eq!(h.runner.calls()[2].steps, ["probe_binary"]);
  }

  #[test]
  fn failed_install_leaves_instance_uninstalled() {
    let h = Harness::new(FakeRunner::default());
    h.runner.fail_on("build");
    let mut ctx = context(false, false);
    let res = h.lifecycle.install(&mut ctx, "2.5.3");
    assert!(!res.ok);
    assert!(!ctx.instance.installed);
    assert!(matches!(&res.errors[0], ProbeError::RemoteUnavailable { step, .. } if step == "build"));
  }

  #[test]
  fn unreachable_host_is_not_provisioned() {
    let h = Harness::new(FakeRunner::default());
    let mut ctx = context(false, false);
    h.runner.fail_host(&ctx.host.address);
    let res = h.lifecycle.install(&mut ctx, "2.5.3");
    assert!(!res.ok);
    assert!(!ctx.instance.installed);
    assert!(
      matches!(&res.errors[0], ProbeError::RemoteUnavailable { step, .. } if step == "probe_binary")
    );
    assert_eq!(h.runner.steps(), ["probe_binary"]);
  }

  #[test]
  fn unsupported_os_makes_no_remote_call() {
    let h = Harness::new(FakeRunner::default());
    let mut ctx = context(false, false);
    ctx.host.os = "centos".into();
    let res = h.lifecycle.install(&mut ctx, "2.5.3");
    assert_eq!(res.errors, vec![ProbeError::UnsupportedOs("centos".into())]);
    assert!(h.runner.calls().is_empty());
  }

  #[test]
  fn uninstalled_instance_short_circuits() {
    let h = Harness::new(FakeRunner::installed());
    let mut ctx = context(false, false);
    let status = h.lifecycle.status(&ctx);
    assert!(status.ok);
    assert_eq!(status.status, NOT_INSTALLED);
    let res = h.lifecycle.deploy_rules(&mut ctx);
    assert_eq!(res.errors, vec![ProbeError::NotInstalled("sensor-1".into())]);
    assert!(!h.lifecycle.start(&ctx).ok);
    assert!(h.runner.calls().is_empty());
    assert!(h.pusher.attempts().is_empty());
  }

  #[test]
  fn status_returns_second_line_of_broctl_output() {
    let h = Harness::new(FakeRunner::installed());
    h.runner.respond("status", "bro   standalone localhost running   4242\n");
    let ctx = context(false, true);
    let status = h.lifecycle.status(&ctx);
    assert!(status.ok);
    assert_eq!(status.status, "bro   standalone localhost running   4242");
    assert!(h.lifecycle.check(&ctx).ok);
  }

  #[test]
  fn check_fails_when_engine_stopped() {
    let h = Harness::new(FakeRunner::installed());
    h.runner.respond("status", "bro standalone localhost stopped\n");
    let report = h.lifecycle.check(&context(false, true));
    assert!(!report.ok);
    assert_eq!(report.errors.len(), 1);
  }

  #[test]
  fn restart_is_stop_then_deploy() {
    let h = Harness::new(FakeRunner::installed());
    assert!(h.lifecycle.restart(&context(false, true)).ok);
    assert_eq!(h.runner.steps(), ["stop", "deploy"]);
  }

  #[test]
  fn secure_deployment_refuses_invalid_rules_without_remote_action() {
    let h = Harness::new(FakeRunner::installed());
    let mut ctx = context(true, true);
    let res = h.lifecycle.deploy_rules(&mut ctx);
    assert!(!res.ok);
    assert_eq!(res.errors.len(), 1);
    assert!(matches!(&res.errors[0], ProbeError::ValidationFailure { rule, .. } if rule.ends_with(": bad")));
    assert!(h.pusher.attempts().is_empty());
    assert!(h.runner.calls().is_empty());
    assert_eq!(ctx.instance.rules_updated_at_unix_ms, None);
  }

  #[test]
  fn non_secure_deployment_skips_validation() {
    let h = Harness::new(FakeRunner::installed());
    let mut ctx = context(false, true);
    let res = h.lifecycle.deploy_rules(&mut ctx);
    assert!(res.ok, "{:?}", res.errors);
    assert_eq!(h.checker.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.pusher.copies().len(), 2);
    assert!(h.pusher.copies()[0].contents.contains("BROKEN"));
    assert_eq!(h.runner.steps(), ["deploy"]);
    assert!(ctx.instance.rules_updated_at_unix_ms.is_some());
  }

  #[test]
  fn partial_copy_failure_keeps_timestamp_and_skips_reload() {
    let h = Harness::new(FakeRunner::installed());
    let paths = RemotePaths::default();
    h.pusher.fail_on(&paths.scripts_file);
    let mut ctx = context(false, true);
    let res = h.lifecycle.deploy_rules(&mut ctx);
    assert!(!res.ok);
    assert_eq!(h.pusher.attempts(), [paths.rules_file.clone(), paths.scripts_file.clone()]);
    assert_eq!(res.errors.len(), 1);
    assert!(h.runner.calls().is_empty());
    assert_eq!(ctx.instance.rules_updated_at_unix_ms, None);
  }

  #[test]
  fn failed_reload_keeps_timestamp() {
    let h = Harness::new(FakeRunner::installed());
    h.runner.fail_on("deploy");
    let mut ctx = context(false, true);
    let res = h.lifecycle.deploy_rules(&mut ctx);
    assert!(!res.ok);
    assert_eq!(h.pusher.copies().len(), 2);
    assert_eq!(ctx.instance.rules_updated_at_unix_ms, None);
  }

  #[test]
  fn test_rules_aggregates_every_failure() {
    let h = Harness::new(FakeRunner::installed());
    let res = h.lifecycle.test_rules(&context(false, true));
    assert!(!res.ok);
    assert_eq!(res.errors.len(), 1);
    assert_eq!(h.checker.calls.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn config_deploy_ships_five_files_then_reloads() {
    let h = Harness::new(FakeRunner::installed());
    let ctx = context(false, true);
    let res = h.lifecycle.deploy_config(&ctx);
    assert!(res.ok, "{:?}", res.errors);
    let copies = h.pusher.copies();
    assert_eq!(copies.len(), 5);
    let intel = copies
      .iter()
      .find(|c| c.remote == ctx.configuration.paths.intel_policy)
      .unwrap();
    assert!(intel.contents.contains(&ctx.configuration.paths.intel_data));
    assert_eq!(h.runner.steps(), ["deploy"]);
  }

  #[test]
  fn secure_config_deploy_validates_local_policy() {
    let h = Harness::new(FakeRunner::installed());
    let mut ctx = context(true, true);
    ctx.configuration.texts.local_policy = "@load BROKEN".into();
    let res = h.lifecycle.deploy_config(&ctx);
    assert!(!res.ok);
    assert!(h.pusher.attempts().is_empty());
    assert!(h.runner.calls().is_empty());
  }

  #[test]
  fn intel_deploy_writes_data_file() {
    let h = Harness::new(FakeRunner::installed());
    let ctx = context(false, true);
    let ind = IntelIndicator {
      id: 1,
      value: "192.168.50.110".into(),
      indicator_type: "Intel::ADDR".into(),
      meta_source: "local".into(),
      meta_desc: String::new(),
      meta_url: String::new(),
    };
    assert!(h.lifecycle.deploy_intel(&ctx, &[ind]).ok);
    let copies = h.pusher.copies();
    assert_eq!(copies.len(), 1);
    assert!(copies[0].contents.contains("192.168.50.110\tIntel::ADDR\tlocal\t-\t-"));
  }
}
