//! Entry point for every operation: owns the catalog, wires the collaborators together and
//! keeps scheduled jobs in step with the entities they belong to.
//!
//! The catalog lock is only held to read or write entities, never across a remote call.
//! Mutating instance operations are serialised per instance by `EntityLocks`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::catalog::{
  import_signature_line, Catalog, EngineConfiguration, EntityId, FeedSubscription, Host, HostDraft,
  ImportOutcome, IndicatorDraft, Instance, InstanceContext, InstanceDraft, IntelIndicator,
  RemotePaths, RuleKind, RuleSet, Script, ScriptDraft, Signature, SignatureDraft,
};
use crate::config::Config;
use crate::deploy::RemoteDeployer;
use crate::error::ProbeError;
use crate::feed_sync::{FeedList, FeedReport, FeedSync};
use crate::job_store::{self, JobRecord};
use crate::lifecycle::{InstanceLifecycle, StatusReport};
use crate::paths;
use crate::remote::{CommandRunner, FilePusher, SshTransport};
use crate::scheduler::{self, Crontab, JobTable, JobTask, PeriodicJob, Scheduler};
use crate::templates::Templates;
use crate::types::{now_unix_ms, OpResult};
use crate::validator::{RuleCheck, RuleValidator};

/// Collaborators a manager is assembled from.
pub struct ManagerParts {
  pub catalog: Catalog,
  pub catalog_path: Option<PathBuf>,
  pub job_runs_dir: Option<PathBuf>,
  pub checker: Arc<dyn RuleCheck>,
  pub runner: Arc<dyn CommandRunner>,
  pub pusher: Arc<dyn FilePusher>,
  pub scheduler: Arc<dyn Scheduler>,
  pub templates: Arc<Templates>,
  pub staging_root: PathBuf,
}

#[derive(Default)]
struct EntityLocks {
  slots: Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
}

impl EntityLocks {
  fn slot(&self, id: EntityId) -> Arc<Mutex<()>> {
    let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
    slots.entry(id).or_default().clone()
  }
}

pub struct ProbeManager {
  catalog: Mutex<Catalog>,
  catalog_path: Option<PathBuf>,
  job_runs_dir: Option<PathBuf>,
  checker: Arc<dyn RuleCheck>,
  lifecycle: InstanceLifecycle,
  feeds: FeedSync,
  scheduler: Arc<dyn Scheduler>,
  templates: Arc<Templates>,
  locks: EntityLocks,
  require_validation_on_write: bool,
  check_schedule: Crontab,
  install_version: String,
}

impl ProbeManager {
  pub fn new(cfg: &Config, parts: ManagerParts) -> Self {
    let deployer = RemoteDeployer::new(
      parts.pusher,
      parts.staging_root,
      cfg.deploy.remote_owner.clone(),
      cfg.deploy.mode_bits(),
    );
    let lifecycle = InstanceLifecycle::new(
      parts.runner.clone(),
      deployer,
      parts.checker.clone(),
      parts.templates.clone(),
    );
    Self {
      catalog: Mutex::new(parts.catalog),
      catalog_path: parts.catalog_path,
      job_runs_dir: parts.job_runs_dir,
      checker: parts.checker,
      lifecycle,
      feeds: FeedSync::new(parts.runner),
      scheduler: parts.scheduler,
      templates: parts.templates,
      locks: EntityLocks::default(),
      require_validation_on_write: cfg.deploy.require_validation_on_write,
      check_schedule: cfg.scheduler.check_crontab(),
      install_version: cfg.install.version.clone(),
    }
  }

  /// Production wiring: on-disk catalog under `base`, SSH transport, engine validator.
  /// `jobs` is shared with the daemon loop that fires them.
  pub fn open(cfg: &Config, base: &Path, jobs: Arc<JobTable>) -> anyhow::Result<Self> {
    let catalog_path = paths::catalog_path(base);
    let catalog = Catalog::load(&catalog_path)?;
    let templates = Templates::load(&cfg.templates_root(base))?;
    let workspace_root = cfg.workspace_root(base);
    let transport = Arc::new(SshTransport::new(cfg.remote.clone()));
    let validator = RuleValidator::new(cfg.engine.clone(), workspace_root.clone());

    Ok(Self::new(
      cfg,
      ManagerParts {
        catalog,
        catalog_path: Some(catalog_path),
        job_runs_dir: Some(paths::job_runs_dir(base)),
        checker: Arc::new(validator),
        runner: transport.clone(),
        pusher: transport,
        scheduler: jobs,
        templates: Arc::new(templates),
        staging_root: workspace_root,
      },
    ))
  }

  fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
    self.catalog.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn persist(&self, catalog: &Catalog) -> Result<(), ProbeError> {
    match self.catalog_path.as_deref() {
      Some(path) => catalog.save(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %format!("{e:#}"), "catalog save failed");
        ProbeError::storage(&e)
      }),
      None => Ok(()),
    }
  }

  /// Runs `f` on a copy of the catalog. The copy replaces the live catalog only once it
  /// has been saved.
  fn mutate<T>(&self, f: impl FnOnce(&mut Catalog) -> Result<T, ProbeError>) -> Result<T, ProbeError> {
    let mut cat = self.lock_catalog();
    let mut next = cat.clone();
    let out = f(&mut next)?;
    self.persist(&next)?;
    *cat = next;
    Ok(out)
  }

  pub fn with_catalog<T>(&self, f: impl FnOnce(&Catalog) -> T) -> T {
    f(&*self.lock_catalog())
  }

  pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
    &self.scheduler
  }

  pub fn job_runs_dir(&self) -> Option<&Path> {
    self.job_runs_dir.as_deref()
  }

  pub fn create_signature(&self, draft: SignatureDraft) -> Result<Signature, ProbeError> {
    if self.with_catalog(|c| c.signature_by_message(draft.message.trim()).is_some()) {
      return Err(ProbeError::duplicate("signature", draft.message.trim()));
    }
    self.gate_signature(0, &draft)?;
    let sig = self.mutate(|c| c.add_signature(draft, now_unix_ms()))?;
    tracing::info!(signature = %sig, "signature created");
    Ok(sig)
  }

  pub fn update_signature(&self, id: EntityId, draft: SignatureDraft) -> Result<Signature, ProbeError> {
    self.gate_signature(id, &draft)?;
    let sig = self.mutate(|c| c.update_signature(id, draft, now_unix_ms()))?;
    tracing::info!(signature = %sig, "signature updated");
    Ok(sig)
  }

  fn gate_signature(&self, id: EntityId, draft: &SignatureDraft) -> Result<(), ProbeError> {
    if !self.require_validation_on_write {
      return Ok(());
    }
    let candidate = Signature {
      id,
      message: draft.message.trim().to_string(),
      body: draft.body.clone(),
      enabled: draft.enabled,
      validation_capture: draft.validation_capture.clone(),
      created_at_unix_ms: 0,
      updated_at_unix_ms: None,
    };
    match self.checker.check_signature(&candidate).to_error(&candidate.message) {
      Some(e) => {
        tracing::warn!(signature = %candidate.message, "signature rejected by validation");
        Err(e)
      }
      None => Ok(()),
    }
  }

  pub fn create_script(&self, draft: ScriptDraft) -> Result<Script, ProbeError> {
    if self.with_catalog(|c| c.script_by_name(draft.name.trim()).is_some()) {
      return Err(ProbeError::duplicate("script", draft.name.trim()));
    }
    self.gate_script(0, &draft)?;
    let script = self.mutate(|c| c.add_script(draft, now_unix_ms()))?;
    tracing::info!(script = %script, "script created");
    Ok(script)
  }

  pub fn update_script(&self, id: EntityId, draft: ScriptDraft) -> Result<Script, ProbeError> {
    self.gate_script(id, &draft)?;
    let script = self.mutate(|c| c.update_script(id, draft, now_unix_ms()))?;
    tracing::info!(script = %script, "script updated");
    Ok(script)
  }

  fn gate_script(&self, id: EntityId, draft: &ScriptDraft) -> Result<(), ProbeError> {
    if !self.require_validation_on_write {
      return Ok(());
    }
    let candidate = Script {
      id,
      name: draft.name.trim().to_string(),
      body: draft.body.clone(),
      enabled: draft.enabled,
      validation_capture: draft.validation_capture.clone(),
      created_at_unix_ms: 0,
      updated_at_unix_ms: None,
    };
    match self.checker.check_script(&candidate).to_error(&candidate.name) {
      Some(e) => {
        tracing::warn!(script = %candidate.name, "script rejected by validation");
        Err(e)
      }
      None => Ok(()),
    }
  }

  pub fn set_rule_enabled(&self, kind: RuleKind, id: EntityId, enabled: bool) -> Result<(), ProbeError> {
    self.mutate(|c| match kind {
      RuleKind::Signature => c.set_signature_enabled(id, enabled),
      RuleKind::Script => c.set_script_enabled(id, enabled),
    })
  }

  pub fn delete_rule(&self, kind: RuleKind, id: EntityId) -> Result<(), ProbeError> {
    self.mutate(|c| match kind {
      RuleKind::Signature => c.delete_signature(id).map(|_| ()),
      RuleKind::Script => c.delete_script(id).map(|_| ()),
    })
  }

  /// Imports every non-blank line of `text` as a signature into the named rulesets.
  pub fn import_signatures(
    &self,
    text: &str,
    ruleset_names: &[String],
  ) -> Vec<Result<ImportOutcome, ProbeError>> {
    let mut cat = self.lock_catalog();
    let ids: Result<Vec<EntityId>, ProbeError> = ruleset_names
      .iter()
      .map(|n| {
        cat
          .ruleset_by_name(n)
          .map(|r| r.id)
          .ok_or_else(|| ProbeError::not_found("ruleset", n))
      })
      .collect();
    let ids = match ids {
      Ok(ids) => ids,
      Err(e) => return vec![Err(e)],
    };

    let now = now_unix_ms();
    let mut next = cat.clone();
    let results: Vec<_> = text
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty() && !l.starts_with('#'))
      .map(|line| import_signature_line(&mut next, line, &ids, now))
      .collect();

    let imported = results.iter().filter(|r| r.is_ok()).count();
    tracing::info!(imported, rejected = results.len() - imported, "signature import finished");
    if imported == 0 {
      return results;
    }
    match self.persist(&next) {
      Ok(()) => {
        *cat = next;
        results
      }
      // Nothing was kept, so every accepted line reports the storage failure.
      Err(e) => results
        .into_iter()
        .map(|r| r.and_then(|_| Err(e.clone())))
        .collect(),
    }
  }

  pub fn create_ruleset(&self, name: &str, description: &str) -> Result<RuleSet, ProbeError> {
    self.mutate(|c| c.add_ruleset(name, description))
  }

  pub fn add_to_ruleset(&self, ruleset: EntityId, kind: RuleKind, rule: EntityId) -> Result<(), ProbeError> {
    self.mutate(|c| c.add_to_ruleset(ruleset, kind, rule))
  }

  pub fn remove_from_ruleset(&self, ruleset: EntityId, kind: RuleKind, rule: EntityId) -> Result<(), ProbeError> {
    self.mutate(|c| c.remove_from_ruleset(ruleset, kind, rule))
  }

  pub fn delete_ruleset(&self, id: EntityId) -> Result<(), ProbeError> {
    self.mutate(|c| c.delete_ruleset(id).map(|_| ()))
  }

  /// New configuration seeded with the default template texts.
  pub fn create_configuration(&self, name: &str, paths: RemotePaths) -> Result<EngineConfiguration, ProbeError> {
    let texts = self.templates.config_texts();
    self.mutate(|c| c.add_configuration(name, paths, texts))
  }

  pub fn create_host(&self, draft: HostDraft) -> Result<Host, ProbeError> {
    self.mutate(|c| c.add_host(draft))
  }

  /// Creates the instance and registers its health-check job, plus its rules-deploy job
  /// when it has a deploy schedule.
  pub fn create_instance(&self, mut draft: InstanceDraft) -> Result<Instance, ProbeError> {
    if draft.check_schedule.is_none() {
      draft.check_schedule = Some(self.check_schedule.clone());
    }
    let inst = self.mutate(|c| c.add_instance(draft))?;
    if let Err(e) = self.register_instance_jobs(&inst) {
      self.deregister_instance_jobs(&inst).ok();
      if let Err(undo) = self.mutate(|c| c.delete_instance(inst.id)) {
        tracing::error!(instance = %inst.name, error = %undo, "failed to roll back instance");
      }
      return Err(e);
    }
    tracing::info!(instance = %inst.name, "instance created");
    Ok(inst)
  }

  /// Removes the jobs named after `inst` and its current deploy schedule.
  fn deregister_instance_jobs(&self, inst: &Instance) -> Result<usize, ProbeError> {
    let mut names = vec![scheduler::check_job_name(&inst.name)];
    if let Some(schedule) = &inst.deploy_schedule {
      names.push(scheduler::deploy_rules_job_name(&inst.name, schedule));
    }
    let mut removed = 0;
    for name in names {
      if self
        .scheduler
        .deregister(&name)
        .map_err(|e| ProbeError::storage(&e))?
      {
        removed += 1;
      }
    }
    Ok(removed)
  }

  fn register_instance_jobs(&self, inst: &Instance) -> Result<(), ProbeError> {
    let check = inst
      .check_schedule
      .clone()
      .unwrap_or_else(|| self.check_schedule.clone());
    self
      .scheduler
      .register(PeriodicJob::new(
        scheduler::check_job_name(&inst.name),
        check,
        JobTask::CheckInstance { instance: inst.id },
      ))
      .map_err(|e| ProbeError::storage(&e))?;

    if let Some(schedule) = inst.deploy_schedule.clone() {
      self
        .scheduler
        .register(PeriodicJob::new(
          scheduler::deploy_rules_job_name(&inst.name, &schedule),
          schedule,
          JobTask::DeployRules { instance: inst.id },
        ))
        .map_err(|e| ProbeError::storage(&e))?;
    }
    Ok(())
  }

  /// Replaces the instance's rules-deploy job; `None` removes it.
  pub fn set_deploy_schedule(&self, name: &str, schedule: Option<Crontab>) -> Result<(), ProbeError> {
    let id = self.instance_id(name)?;
    let slot = self.locks.slot(id);
    let _guard = slot.lock().unwrap_or_else(|p| p.into_inner());

    let previous = self.with_catalog(|c| c.instance(id).and_then(|i| i.deploy_schedule.clone()));
    let inst = self.mutate(|c| c.set_deploy_schedule(id, schedule))?;
    if let Some(old) = previous {
      self
        .scheduler
        .deregister(&scheduler::deploy_rules_job_name(&inst.name, &old))
        .map_err(|e| ProbeError::storage(&e))?;
    }
    self.register_instance_jobs(&inst)
  }

  pub fn set_instance_rulesets(&self, name: &str, rulesets: Vec<EntityId>) -> Result<(), ProbeError> {
    let id = self.instance_id(name)?;
    self.mutate(|c| c.set_instance_rulesets(id, rulesets))
  }

  /// Deletes the instance and every job scheduled for it.
  pub fn delete_instance(&self, name: &str) -> Result<Instance, ProbeError> {
    let id = self.instance_id(name)?;
    let slot = self.locks.slot(id);
    let _guard = slot.lock().unwrap_or_else(|p| p.into_inner());

    let inst = self.mutate(|c| c.delete_instance(id))?;
    let removed = self.deregister_instance_jobs(&inst)?;
    tracing::info!(instance = %inst.name, jobs_removed = removed, "instance deleted");
    Ok(inst)
  }

  pub fn create_subscription(
    &self,
    api_key: &str,
    pull_schedule: Crontab,
    instance_names: &[String],
  ) -> Result<FeedSubscription, ProbeError> {
    let ids = instance_names
      .iter()
      .map(|n| self.instance_id(n))
      .collect::<Result<Vec<_>, _>>()?;
    let sub = self.mutate(|c| c.add_subscription(api_key, pull_schedule, ids))?;
    let registered = self.scheduler.register(PeriodicJob::new(
      scheduler::feed_job_name(&sub.api_key),
      sub.pull_schedule.clone(),
      JobTask::PullFeed {
        api_key: sub.api_key.clone(),
      },
    ));
    if let Err(e) = registered {
      if let Err(undo) = self.mutate(|c| c.delete_subscription(&sub.api_key)) {
        tracing::error!(error = %undo, "failed to roll back subscription");
      }
      return Err(ProbeError::storage(&e));
    }
    Ok(sub)
  }

  pub fn delete_subscription(&self, api_key: &str) -> Result<FeedSubscription, ProbeError> {
    let sub = self.mutate(|c| c.delete_subscription(api_key))?;
    self
      .scheduler
      .deregister(&scheduler::feed_job_name(&sub.api_key))
      .map_err(|e| ProbeError::storage(&e))?;
    Ok(sub)
  }

  pub fn add_indicator(&self, draft: IndicatorDraft) -> Result<IntelIndicator, ProbeError> {
    self.mutate(|c| c.add_indicator(draft))
  }

  pub fn delete_indicator(&self, id: EntityId) -> Result<(), ProbeError> {
    self.mutate(|c| c.delete_indicator(id).map(|_| ()))
  }

  fn instance_id(&self, name: &str) -> Result<EntityId, ProbeError> {
    self
      .with_catalog(|c| c.instance_by_name(name).map(|i| i.id))
      .ok_or_else(|| ProbeError::not_found("instance", name))
  }

  fn context(&self, name: &str) -> Result<InstanceContext, ProbeError> {
    let cat = self.lock_catalog();
    let id = cat
      .instance_by_name(name)
      .map(|i| i.id)
      .ok_or_else(|| ProbeError::not_found("instance", name))?;
    cat.resolve_instance(id)
  }

  /// Runs a mutating instance operation under the instance's lock.
  fn exclusive<T>(
    &self,
    name: &str,
    on_missing: impl FnOnce(ProbeError) -> T,
    f: impl FnOnce(InstanceContext) -> T,
  ) -> T {
    let id = match self.instance_id(name) {
      Ok(id) => id,
      Err(e) => return on_missing(e),
    };
    let slot = self.locks.slot(id);
    let _guard = slot.lock().unwrap_or_else(|p| p.into_inner());
    match self.context(name) {
      Ok(ctx) => f(ctx),
      Err(e) => on_missing(e),
    }
  }

  pub fn install(&self, name: &str, version: Option<&str>) -> OpResult {
    let version = version.unwrap_or(&self.install_version).to_string();
    self.exclusive(name, OpResult::failed, |mut ctx| {
      let mut res = self.lifecycle.install(&mut ctx, &version);
      if res.ok {
        self.write_back(&mut res, |c| c.record_install(ctx.instance.id));
      }
      res
    })
  }

  pub fn update(&self, name: &str, version: Option<&str>) -> OpResult {
    self.install(name, version)
  }

  pub fn start(&self, name: &str) -> OpResult {
    self.shared_op(name, |ctx| self.lifecycle.start(ctx))
  }

  pub fn stop(&self, name: &str) -> OpResult {
    self.shared_op(name, |ctx| self.lifecycle.stop(ctx))
  }

  pub fn restart(&self, name: &str) -> OpResult {
    self.shared_op(name, |ctx| self.lifecycle.restart(ctx))
  }

  pub fn reload(&self, name: &str) -> OpResult {
    self.shared_op(name, |ctx| self.lifecycle.reload(ctx))
  }

  pub fn test_rules(&self, name: &str) -> OpResult {
    self.shared_op(name, |ctx| self.lifecycle.test_rules(ctx))
  }

  fn shared_op(&self, name: &str, f: impl FnOnce(&InstanceContext) -> OpResult) -> OpResult {
    match self.context(name) {
      Ok(ctx) => f(&ctx),
      Err(e) => OpResult::failed(e),
    }
  }

  pub fn status(&self, name: &str) -> StatusReport {
    match self.context(name) {
      Ok(ctx) => self.lifecycle.status(&ctx),
      Err(e) => missing_status(e),
    }
  }

  pub fn uptime(&self, name: &str) -> StatusReport {
    match self.context(name) {
      Ok(ctx) => self.lifecycle.uptime(&ctx),
      Err(e) => missing_status(e),
    }
  }

  pub fn check(&self, name: &str) -> StatusReport {
    match self.context(name) {
      Ok(ctx) => self.lifecycle.check(&ctx),
      Err(e) => missing_status(e),
    }
  }

  pub fn deploy_rules(&self, name: &str) -> OpResult {
    self.exclusive(name, OpResult::failed, |mut ctx| {
      let mut res = self.lifecycle.deploy_rules(&mut ctx);
      if let (true, Some(at)) = (res.ok, ctx.instance.rules_updated_at_unix_ms) {
        self.write_back(&mut res, |c| c.record_rules_deployed(ctx.instance.id, at));
      }
      res
    })
  }

  pub fn deploy_config(&self, name: &str) -> OpResult {
    self.exclusive(name, OpResult::failed, |ctx| self.lifecycle.deploy_config(&ctx))
  }

  pub fn deploy_intel(&self, name: &str) -> OpResult {
    let indicators: Vec<IntelIndicator> = self.with_catalog(|c| c.indicators().cloned().collect());
    self.exclusive(name, OpResult::failed, |ctx| {
      self.lifecycle.deploy_intel(&ctx, &indicators)
    })
  }

  fn write_back(&self, res: &mut OpResult, f: impl FnOnce(&mut Catalog) -> Result<(), ProbeError>) {
    if let Err(e) = self.mutate(f) {
      // The instance may have been deleted while the remote work ran.
      if !matches!(e, ProbeError::NotFound { .. }) {
        res.merge(OpResult::failed(e));
      }
    }
  }

  pub fn pull_feed(&self, api_key: &str) -> FeedReport {
    let targets = self.with_catalog(|c| {
      c.subscription_by_key(api_key)
        .map(|s| c.subscription_targets(s))
    });
    match targets {
      Some(targets) => self.feeds.pull(api_key, &targets),
      None => OpResult::failed(ProbeError::not_found("subscription", api_key)),
    }
  }

  pub fn list_feeds(&self, api_key: &str) -> FeedList {
    let targets = self.with_catalog(|c| {
      c.subscription_by_key(api_key)
        .map(|s| c.subscription_targets(s))
    });
    match targets {
      Some(targets) => self.feeds.list_feeds(api_key, &targets),
      None => FeedList {
        ok: false,
        feeds: Vec::new(),
        errors: vec![ProbeError::not_found("subscription", api_key)],
      },
    }
  }

  /// Executes a scheduled job and records the run.
  pub fn run_job(&self, job: &PeriodicJob) -> JobRecord {
    let started = now_unix_ms();
    let (ok, message) = match &job.task {
      JobTask::DeployRules { instance } => match self.instance_name(*instance) {
        Some(name) => summarize(self.deploy_rules(&name), "Deployed rules successfully"),
        None => (false, format!("instance {instance} no longer exists")),
      },
      JobTask::CheckInstance { instance } => match self.instance_name(*instance) {
        Some(name) => {
          let report = self.check(&name);
          let message = if report.ok {
            format!("Instance is up: {}", report.status)
          } else {
            error_summary(&report.errors)
          };
          (report.ok, message)
        }
        None => (false, format!("instance {instance} no longer exists")),
      },
      JobTask::PullFeed { api_key } => {
        summarize(self.pull_feed(api_key), "Deployed Critical Stack successfully")
      }
    };

    let record = JobRecord::finish(&job.name, started, ok, message);
    if ok {
      tracing::info!(job = %job.name, run_id = %record.run_id, "job completed");
    } else {
      tracing::warn!(job = %job.name, run_id = %record.run_id, message = %record.message, "job failed");
    }
    if let Some(dir) = self.job_runs_dir.as_deref() {
      if let Err(e) = job_store::store_record(dir, &record) {
        tracing::warn!(job = %job.name, error = %format!("{e:#}"), "failed to store job record");
      }
    }
    record
  }

  fn instance_name(&self, id: EntityId) -> Option<String> {
    self.with_catalog(|c| c.instance(id).map(|i| i.name.clone()))
  }
}

fn summarize(res: OpResult, success: &str) -> (bool, String) {
  if res.ok {
    (true, success.to_string())
  } else {
    (false, res.error_summary())
  }
}

fn error_summary(errors: &[ProbeError]) -> String {
  errors
    .iter()
    .map(|e| e.to_string())
    .collect::<Vec<_>>()
    .join("; ")
}

fn missing_status(e: ProbeError) -> StatusReport {
  StatusReport {
    ok: false,
    status: String::new(),
    errors: vec![e],
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::fixtures::{debian_host, sig};
  use crate::lifecycle::tests::FakeCheck;
  use crate::remote::mock::{FakePusher, FakeRunner};
  use std::sync::atomic::Ordering;

  struct Fixture {
    manager: ProbeManager,
    runner: Arc<FakeRunner>,
    pusher: Arc<FakePusher>,
    checker: Arc<FakeCheck>,
    table: Arc<JobTable>,
    dir: tempfile::TempDir,
  }

  fn fixture(require_validation: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let catalog_path = dir.path().join("catalog.json");
    build(dir, require_validation, catalog_path, Arc::new(JobTable::in_memory()))
  }

  fn build(
    dir: tempfile::TempDir,
    require_validation: bool,
    catalog_path: PathBuf,
    table: Arc<JobTable>,
  ) -> Fixture {
    let mut cfg = Config::default();
    cfg.deploy.require_validation_on_write = require_validation;
    let runner = Arc::new(FakeRunner::installed());
    let pusher = Arc::new(FakePusher::default());
    let checker = Arc::new(FakeCheck::default());
    let manager = ProbeManager::new(
      &cfg,
      ManagerParts {
        catalog: Catalog::default(),
        catalog_path: Some(catalog_path),
        job_runs_dir: Some(dir.path().join("jobs")),
        checker: checker.clone(),
        runner: runner.clone(),
        pusher: pusher.clone(),
        scheduler: table.clone(),
        templates: Arc::new(Templates::default()),
        staging_root: dir.path().join("work"),
      },
    );
    Fixture {
      manager,
      runner,
      pusher,
      checker,
      table,
      dir,
    }
  }

  fn add_instance(m: &ProbeManager, name: &str, deploy: Option<&str>) -> Instance {
    let host = m.create_host(debian_host(&format!("{name}-host"))).unwrap();
    let cfg = m
      .create_configuration(&format!("{name}-cfg"), RemotePaths::default())
      .unwrap();
    m.create_instance(InstanceDraft {
      name: name.to_string(),
      description: String::new(),
      secure_deployment: false,
      configuration: cfg.id,
      host: host.id,
      rulesets: vec![],
      deploy_schedule: deploy.map(|d| d.parse().unwrap()),
      check_schedule: None,
    })
    .unwrap()
  }

  #[test]
  fn instance_jobs_follow_instance_lifetime() {
    let f = fixture(false);
    add_instance(&f.manager, "s1", Some("0 3 * * *"));
    add_instance(&f.manager, "s10", Some("0 4 * * *"));
    assert_eq!(f.table.job_names().len(), 4);

    f.manager.delete_instance("s1").unwrap();
    let names = f.table.job_names();
    assert_eq!(
      names,
      ["s10_check_task".to_string(), "s10_deploy_rules_0 4 * * *".to_string()]
    );
  }

  #[test]
  fn deleting_instance_spares_similarly_named_one() {
    let f = fixture(false);
    add_instance(&f.manager, "s1", Some("0 3 * * *"));
    add_instance(&f.manager, "s1_deploy_rules_x", Some("0 4 * * *"));
    f.manager.delete_instance("s1").unwrap();
    assert_eq!(
      f.table.job_names(),
      [
        "s1_deploy_rules_x_check_task".to_string(),
        "s1_deploy_rules_x_deploy_rules_0 4 * * *".to_string(),
      ]
    );
  }

  #[test]
  fn failed_catalog_save_keeps_memory_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("blocker"), "").unwrap();
    let catalog_path = dir.path().join("blocker").join("catalog.json");
    let f = build(dir, false, catalog_path, Arc::new(JobTable::in_memory()));

    let err = f.manager.create_ruleset("core", "").unwrap_err();
    assert!(matches!(err, ProbeError::Storage(_)));
    assert!(f.manager.with_catalog(|c| c.ruleset_by_name("core").is_none()));
    let retry = f.manager.create_ruleset("core", "").unwrap_err();
    assert!(matches!(retry, ProbeError::Storage(_)));

    let results = f
      .manager
      .import_signatures("signature a { event \"A\" }\n", &[]);
    assert!(matches!(results[..], [Err(ProbeError::Storage(_))]));
    assert_eq!(f.manager.with_catalog(|c| c.signatures().count()), 0);
  }

  #[test]
  fn failed_job_registration_rolls_back_the_entity() {
    let dir = tempfile::tempdir().unwrap();
    let sched_dir = dir.path().join("sched");
    let table = Arc::new(JobTable::open(&sched_dir.join("schedule.toml")).unwrap());
    let catalog_path = dir.path().join("catalog.json");
    let f = build(dir, false, catalog_path, table);
    add_instance(&f.manager, "s1", None);

    std::fs::remove_dir_all(&sched_dir).unwrap();
    std::fs::write(&sched_dir, "").unwrap();

    let err = f
      .manager
      .create_subscription("KEY", "*/30 * * * *".parse().unwrap(), &["s1".to_string()])
      .unwrap_err();
    assert!(matches!(err, ProbeError::Storage(_)));
    assert!(f.manager.with_catalog(|c| c.subscription_by_key("KEY").is_none()));

    let host = f.manager.create_host(debian_host("s2-host")).unwrap();
    let cfg = f
      .manager
      .create_configuration("s2-cfg", RemotePaths::default())
      .unwrap();
    let err = f
      .manager
      .create_instance(InstanceDraft {
        name: "s2".into(),
        description: String::new(),
        secure_deployment: false,
        configuration: cfg.id,
        host: host.id,
        rulesets: vec![],
        deploy_schedule: None,
        check_schedule: None,
      })
      .unwrap_err();
    assert!(matches!(err, ProbeError::Storage(_)));
    assert!(f.manager.with_catalog(|c| c.instance_by_name("s2").is_none()));
    assert_eq!(f.table.job_names(), ["s1_check_task".to_string()]);
  }

  #[test]
  fn subscription_job_follows_subscription_lifetime() {
    let f = fixture(false);
    add_instance(&f.manager, "s1", None);
    f.manager
      .create_subscription("KEY", "*/30 * * * *".parse().unwrap(), &["s1".to_string()])
      .unwrap();
    assert!(f.table.job_names().contains(&"KEY_deploy_critical_stack".to_string()));
    f.manager.delete_subscription("KEY").unwrap();
    assert_eq!(f.table.job_names(), ["s1_check_task".to_string()]);
  }

  #[test]
  fn deploy_schedule_change_replaces_job() {
    let f = fixture(false);
    add_instance(&f.manager, "s1", Some("0 3 * * *"));
    f.manager
      .set_deploy_schedule("s1", Some("30 1 * * *".parse().unwrap()))
      .unwrap();
    assert!(f.table.job_names().contains(&"s1_deploy_rules_30 1 * * *".to_string()));
    assert!(!f.table.job_names().contains(&"s1_deploy_rules_0 3 * * *".to_string()));
  }

  #[test]
  fn invalid_rule_is_rejected_when_validation_required() {
    let f = fixture(true);
    let mut draft = sig("bad", true);
    draft.body = "signature bad { BROKEN }".into();
    let err = f.manager.create_signature(draft.clone()).unwrap_err();
    assert!(matches!(err, ProbeError::ValidationFailure { .. }));
    assert_eq!(f.manager.with_catalog(|c| c.signatures().count()), 0);

    let relaxed = fixture(false);
    assert!(relaxed.manager.create_signature(draft).is_ok());
    assert_eq!(relaxed.checker.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn install_and_deploy_are_persisted() {
    let f = fixture(false);
    let inst = add_instance(&f.manager, "s1", None);
    let s = f.manager.create_signature(sig("alpha", true)).unwrap();
    let rs = f.manager.create_ruleset("core", "").unwrap();
    f.manager.add_to_ruleset(rs.id, RuleKind::Signature, s.id).unwrap();
    f.manager.set_instance_rulesets("s1", vec![rs.id]).unwrap();

    assert!(f.manager.install("s1", None).ok);
    assert!(f.manager.deploy_rules("s1").ok);

    let reloaded = Catalog::load(&f.dir.path().join("catalog.json")).unwrap();
    let stored = reloaded.instance(inst.id).unwrap();
    assert!(stored.installed);
    assert!(stored.rules_updated_at_unix_ms.is_some());
    assert!(f.pusher.copies()[0].contents.contains("alpha"));
  }

  #[test]
  fn partial_deploy_does_not_move_rules_timestamp() {
    let f = fixture(false);
    let inst = add_instance(&f.manager, "s1", None);
    assert!(f.manager.install("s1", None).ok);
    f.pusher.fail_on(&RemotePaths::default().rules_file);
    let res = f.manager.deploy_rules("s1");
    assert!(!res.ok);
    assert_eq!(f.pusher.attempts().len(), 2);
    let ts = f
      .manager
      .with_catalog(|c| c.instance(inst.id).unwrap().rules_updated_at_unix_ms);
    assert_eq!(ts, None);
  }

  #[test]
  fn unknown_instance_is_reported_not_raised() {
    let f = fixture(false);
    let res = f.manager.deploy_rules("ghost");
    assert_eq!(res.errors, vec![ProbeError::not_found("instance", "ghost")]);
    assert!(f.runner.calls().is_empty());
  }

  #[test]
  fn job_runs_are_recorded() {
    let f = fixture(false);
    let inst = add_instance(&f.manager, "s1", None);
    f.runner.respond("status", "bro standalone localhost running 99\n");
    assert!(f.manager.install("s1", None).ok);
    let job = PeriodicJob::new(
      scheduler::check_job_name("s1"),
      Crontab::every_minutes(5),
      JobTask::CheckInstance { instance: inst.id },
    );
    let record = f.manager.run_job(&job);
    assert_eq!(record.status, crate::job_store::JobStatus::Completed);
    let stored = job_store::list_recent(&f.dir.path().join("jobs"), 5).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].job_name, "s1_check_task");
  }

  #[test]
  fn import_attaches_to_named_rulesets() {
    let f = fixture(false);
    f.manager.create_ruleset("imported", "").unwrap();
    let text = "signature a { event \"A\" }\n\n# comment\nsignature b { event \"B\" }\nno event here\n";
    let results = f.manager.import_signatures(text, &["imported".to_string()]);
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    let members = f
      .manager
      .with_catalog(|c| c.ruleset_by_name("imported").unwrap().signatures.len());
    assert_eq!(members, 2);
  }
}
