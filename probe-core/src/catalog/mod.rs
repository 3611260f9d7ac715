//! Entity store for rules, rulesets, configurations, hosts, instances, feed subscriptions
//! and intel indicators.
//!
//! Every entity is keyed by a numeric id drawn from one counter; display keys (signature
//! message, script name, ruleset name, ...) are unique and checked on insert. The whole
//! catalog is one JSON document replaced atomically on save.

mod import;
mod model;

pub use import::{import_signature_line, ImportOutcome};
pub use model::*;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ProbeError;
use crate::scheduler::Crontab;
use crate::types::normalize_rule_text;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
  #[serde(default)]
  next_id: EntityId,
  #[serde(default)]
  signatures: BTreeMap<EntityId, Signature>,
  #[serde(default)]
  scripts: BTreeMap<EntityId, Script>,
  #[serde(default)]
  rulesets: BTreeMap<EntityId, RuleSet>,
  #[serde(default)]
  configurations: BTreeMap<EntityId, EngineConfiguration>,
  #[serde(default)]
  hosts: BTreeMap<EntityId, Host>,
  #[serde(default)]
  instances: BTreeMap<EntityId, Instance>,
  #[serde(default)]
  subscriptions: BTreeMap<EntityId, FeedSubscription>,
  #[serde(default)]
  indicators: BTreeMap<EntityId, IntelIndicator>,
}

/// Everything an instance operation needs, read from the catalog in one pass.
#[derive(Debug, Clone)]
pub struct InstanceContext {
  pub instance: Instance,
  pub host: Host,
  pub configuration: EngineConfiguration,
  pub rulesets: Vec<ResolvedRuleSet>,
}

impl Catalog {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    if !path.exists() {
      return Ok(Self::default());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let catalog: Self =
      serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(catalog)
  }

  pub fn save(&self, path: &Path) -> anyhow::Result<()> {
    let parent = path
      .parent()
      .ok_or_else(|| anyhow::anyhow!("catalog path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(".catalog.json.tmp");
    let body = serde_json::to_string_pretty(self)?;
    fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
  }

  fn allocate_id(&mut self) -> EntityId {
    self.next_id += 1;
    self.next_id
  }

  pub fn signatures(&self) -> impl Iterator<Item = &Signature> {
    self.signatures.values()
  }

  pub fn signature(&self, id: EntityId) -> Option<&Signature> {
    self.signatures.get(&id)
  }

  pub fn signature_by_message(&self, message: &str) -> Option<&Signature> {
    self.signatures.values().find(|s| s.message == message)
  }

  pub fn add_signature(&mut self, draft: SignatureDraft, now_ms: u64) -> Result<Signature, ProbeError> {
    let message = required("message", &draft.message)?;
    let body = required_body(&draft.body)?;
    if self.signature_by_message(&message).is_some() {
      return Err(ProbeError::duplicate("signature", message));
    }
    let sig = Signature {
      id: self.allocate_id(),
      message,
      body,
      enabled: draft.enabled,
      validation_capture: draft.validation_capture,
      created_at_unix_ms: now_ms,
      updated_at_unix_ms: None,
    };
    self.signatures.insert(sig.id, sig.clone());
    Ok(sig)
  }

  pub fn update_signature(
    &mut self,
    id: EntityId,
    draft: SignatureDraft,
    now_ms: u64,
  ) -> Result<Signature, ProbeError> {
    let message = required("message", &draft.message)?;
    let body = required_body(&draft.body)?;
    if self
      .signature_by_message(&message)
      .is_some_and(|other| other.id != id)
    {
      return Err(ProbeError::duplicate("signature", message));
    }
    let sig = self
      .signatures
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("signature", id))?;
    sig.message = message;
    sig.body = body;
    sig.enabled = draft.enabled;
    sig.validation_capture = draft.validation_capture;
    sig.updated_at_unix_ms = Some(now_ms);
    Ok(sig.clone())
  }

  pub fn set_signature_enabled(&mut self, id: EntityId, enabled: bool) -> Result<(), ProbeError> {
    let sig = self
      .signatures
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("signature", id))?;
    sig.enabled = enabled;
    Ok(())
  }

  pub fn delete_signature(&mut self, id: EntityId) -> Result<Signature, ProbeError> {
    let sig = self
      .signatures
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("signature", id))?;
    for rs in self.rulesets.values_mut() {
      rs.signatures.retain(|m| *m != id);
    }
    Ok(sig)
  }

  /// Signatures whose body contains `pattern`.
  pub fn find_signatures(&self, pattern: &str) -> Vec<&Signature> {
    self
      .signatures
      .values()
      .filter(|s| s.body.contains(pattern))
      .collect()
  }

  pub fn scripts(&self) -> impl Iterator<Item = &Script> {
    self.scripts.values()
  }

  pub fn script(&self, id: EntityId) -> Option<&Script> {
    self.scripts.get(&id)
  }

  pub fn script_by_name(&self, name: &str) -> Option<&Script> {
    self.scripts.values().find(|s| s.name == name)
  }

  pub fn add_script(&mut self, draft: ScriptDraft, now_ms: u64) -> Result<Script, ProbeError> {
    let name = required("name", &draft.name)?;
    let body = required_body(&draft.body)?;
    if self.script_by_name(&name).is_some() {
      return Err(ProbeError::duplicate("script", name));
    }
    let script = Script {
      id: self.allocate_id(),
      name,
      body,
      enabled: draft.enabled,
      validation_capture: draft.validation_capture,
      created_at_unix_ms: now_ms,
      updated_at_unix_ms: None,
    };
    self.scripts.insert(script.id, script.clone());
    Ok(script)
  }

  pub fn update_script(
    &mut self,
    id: EntityId,
    draft: ScriptDraft,
    now_ms: u64,
  ) -> Result<Script, ProbeError> {
    let name = required("name", &draft.name)?;
    let body = required_body(&draft.body)?;
    if self.script_by_name(&name).is_some_and(|other| other.id != id) {
      return Err(ProbeError::duplicate("script", name));
    }
    let script = self
      .scripts
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("script", id))?;
    script.name = name;
    script.body = body;
    script.enabled = draft.enabled;
    script.validation_capture = draft.validation_capture;
    script.updated_at_unix_ms = Some(now_ms);
    Ok(script.clone())
  }

  pub fn set_script_enabled(&mut self, id: EntityId, enabled: bool) -> Result<(), ProbeError> {
    let script = self
      .scripts
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("script", id))?;
    script.enabled = enabled;
    Ok(())
  }

  pub fn delete_script(&mut self, id: EntityId) -> Result<Script, ProbeError> {
    let script = self
      .scripts
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("script", id))?;
    for rs in self.rulesets.values_mut() {
      rs.scripts.retain(|m| *m != id);
    }
    Ok(script)
  }

  pub fn find_scripts(&self, pattern: &str) -> Vec<&Script> {
    self
      .scripts
      .values()
      .filter(|s| s.body.contains(pattern))
      .collect()
  }

  pub fn ruleset(&self, id: EntityId) -> Option<&RuleSet> {
    self.rulesets.get(&id)
  }

  pub fn ruleset_by_name(&self, name: &str) -> Option<&RuleSet> {
    self.rulesets.values().find(|r| r.name == name)
  }

  pub fn add_ruleset(&mut self, name: &str, description: &str) -> Result<RuleSet, ProbeError> {
    let name = required("name", name)?;
    if self.ruleset_by_name(&name).is_some() {
      return Err(ProbeError::duplicate("ruleset", name));
    }
    let rs = RuleSet {
      id: self.allocate_id(),
      name,
      description: description.to_string(),
      signatures: Vec::new(),
      scripts: Vec::new(),
    };
    self.rulesets.insert(rs.id, rs.clone());
    Ok(rs)
  }

  /// Adds a rule to a ruleset. Adding a member twice keeps the first position.
  pub fn add_to_ruleset(
    &mut self,
    ruleset_id: EntityId,
    kind: RuleKind,
    rule_id: EntityId,
  ) -> Result<(), ProbeError> {
    let exists = match kind {
      RuleKind::Signature => self.signatures.contains_key(&rule_id),
      RuleKind::Script => self.scripts.contains_key(&rule_id),
    };
    if !exists {
      return Err(ProbeError::not_found(kind.as_str(), rule_id));
    }
    let rs = self
      .rulesets
      .get_mut(&ruleset_id)
      .ok_or_else(|| ProbeError::not_found("ruleset", ruleset_id))?;
    let members = match kind {
      RuleKind::Signature => &mut rs.signatures,
      RuleKind::Script => &mut rs.scripts,
    };
    if !members.contains(&rule_id) {
      members.push(rule_id);
    }
    Ok(())
  }

  pub fn remove_from_ruleset(
    &mut self,
    ruleset_id: EntityId,
    kind: RuleKind,
    rule_id: EntityId,
  ) -> Result<(), ProbeError> {
    let rs = self
      .rulesets
      .get_mut(&ruleset_id)
      .ok_or_else(|| ProbeError::not_found("ruleset", ruleset_id))?;
    match kind {
      RuleKind::Signature => rs.signatures.retain(|m| *m != rule_id),
      RuleKind::Script => rs.scripts.retain(|m| *m != rule_id),
    }
    Ok(())
  }

  pub fn delete_ruleset(&mut self, id: EntityId) -> Result<RuleSet, ProbeError> {
    let rs = self
      .rulesets
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("ruleset", id))?;
    for inst in self.instances.values_mut() {
      inst.rulesets.retain(|r| *r != id);
    }
    Ok(rs)
  }

  /// Members of `id` with their current catalog content, in member order.
  pub fn resolve_ruleset(&self, id: EntityId) -> Result<ResolvedRuleSet, ProbeError> {
    let rs = self
      .rulesets
      .get(&id)
      .ok_or_else(|| ProbeError::not_found("ruleset", id))?;
    Ok(ResolvedRuleSet {
      name: rs.name.clone(),
      signatures: rs
        .signatures
        .iter()
        .filter_map(|sid| self.signatures.get(sid).cloned())
        .collect(),
      scripts: rs
        .scripts
        .iter()
        .filter_map(|sid| self.scripts.get(sid).cloned())
        .collect(),
    })
  }

  pub fn configuration(&self, id: EntityId) -> Option<&EngineConfiguration> {
    self.configurations.get(&id)
  }

  pub fn add_configuration(
    &mut self,
    name: &str,
    paths: RemotePaths,
    texts: ConfigTexts,
  ) -> Result<EngineConfiguration, ProbeError> {
    let name = required("name", name)?;
    if self.configurations.values().any(|c| c.name == name) {
      return Err(ProbeError::duplicate("configuration", name));
    }
    let cfg = EngineConfiguration {
      id: self.allocate_id(),
      name,
      paths,
      texts,
    };
    self.configurations.insert(cfg.id, cfg.clone());
    Ok(cfg)
  }

  pub fn update_configuration_texts(
    &mut self,
    id: EntityId,
    texts: ConfigTexts,
  ) -> Result<(), ProbeError> {
    let cfg = self
      .configurations
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("configuration", id))?;
    cfg.texts = texts;
    Ok(())
  }

  pub fn delete_configuration(&mut self, id: EntityId) -> Result<EngineConfiguration, ProbeError> {
    if let Some(user) = self.instances.values().find(|i| i.configuration == id) {
      return Err(ProbeError::invalid(
        "configuration",
        format!("still used by instance `{}`", user.name),
      ));
    }
    self
      .configurations
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("configuration", id))
  }

  pub fn host(&self, id: EntityId) -> Option<&Host> {
    self.hosts.get(&id)
  }

  pub fn add_host(&mut self, draft: HostDraft) -> Result<Host, ProbeError> {
    let name = required("name", &draft.name)?;
    let address = required("address", &draft.address)?;
    if self.hosts.values().any(|h| h.name == name) {
      return Err(ProbeError::duplicate("host", name));
    }
    let host = Host {
      id: self.allocate_id(),
      name,
      address,
      port: draft.port,
      user: draft.user,
      os: draft.os,
    };
    self.hosts.insert(host.id, host.clone());
    Ok(host)
  }

  pub fn delete_host(&mut self, id: EntityId) -> Result<Host, ProbeError> {
    if let Some(user) = self.instances.values().find(|i| i.host == id) {
      return Err(ProbeError::invalid(
        "host",
        format!("still used by instance `{}`", user.name),
      ));
    }
    self
      .hosts
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("host", id))
  }

  pub fn instances(&self) -> impl Iterator<Item = &Instance> {
    self.instances.values()
  }

  pub fn instance(&self, id: EntityId) -> Option<&Instance> {
    self.instances.get(&id)
  }

  pub fn instance_by_name(&self, name: &str) -> Option<&Instance> {
    self.instances.values().find(|i| i.name == name)
  }

  pub fn add_instance(&mut self, draft: InstanceDraft) -> Result<Instance, ProbeError> {
    let name = required("name", &draft.name)?;
    if self.instance_by_name(&name).is_some() {
      return Err(ProbeError::duplicate("instance", name));
    }
    if !self.configurations.contains_key(&draft.configuration) {
      return Err(ProbeError::not_found("configuration", draft.configuration));
    }
    if !self.hosts.contains_key(&draft.host) {
      return Err(ProbeError::not_found("host", draft.host));
    }
    if let Some(missing) = draft.rulesets.iter().find(|r| !self.rulesets.contains_key(*r)) {
      return Err(ProbeError::not_found("ruleset", missing));
    }
    let mut rulesets = Vec::with_capacity(draft.rulesets.len());
    for r in draft.rulesets {
      if !rulesets.contains(&r) {
        rulesets.push(r);
      }
    }
    let inst = Instance {
      id: self.allocate_id(),
      name,
      description: draft.description,
      kind: EngineKind::Bro,
      installed: false,
      secure_deployment: draft.secure_deployment,
      configuration: draft.configuration,
      host: draft.host,
      rulesets,
      rules_updated_at_unix_ms: None,
      deploy_schedule: draft.deploy_schedule,
      check_schedule: draft.check_schedule,
    };
    self.instances.insert(inst.id, inst.clone());
    Ok(inst)
  }

  pub fn set_instance_rulesets(
    &mut self,
    id: EntityId,
    rulesets: Vec<EntityId>,
  ) -> Result<(), ProbeError> {
    if let Some(missing) = rulesets.iter().find(|r| !self.rulesets.contains_key(*r)) {
      return Err(ProbeError::not_found("ruleset", missing));
    }
    let inst = self
      .instances
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("instance", id))?;
    inst.rulesets.clear();
    for r in rulesets {
      if !inst.rulesets.contains(&r) {
        inst.rulesets.push(r);
      }
    }
    Ok(())
  }

  pub fn set_deploy_schedule(
    &mut self,
    id: EntityId,
    schedule: Option<Crontab>,
  ) -> Result<Instance, ProbeError> {
    let inst = self
      .instances
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("instance", id))?;
    inst.deploy_schedule = schedule;
    Ok(inst.clone())
  }

  /// Removes the instance and detaches it from every feed subscription.
  pub fn delete_instance(&mut self, id: EntityId) -> Result<Instance, ProbeError> {
    let inst = self
      .instances
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("instance", id))?;
    for sub in self.subscriptions.values_mut() {
      sub.instances.retain(|i| *i != id);
    }
    Ok(inst)
  }

  pub fn resolve_instance(&self, id: EntityId) -> Result<InstanceContext, ProbeError> {
    let instance = self
      .instances
      .get(&id)
      .ok_or_else(|| ProbeError::not_found("instance", id))?;
    let host = self
      .hosts
      .get(&instance.host)
      .ok_or_else(|| ProbeError::not_found("host", instance.host))?;
    let configuration = self
      .configurations
      .get(&instance.configuration)
      .ok_or_else(|| ProbeError::not_found("configuration", instance.configuration))?;
    let rulesets = instance
      .rulesets
      .iter()
      .map(|r| self.resolve_ruleset(*r))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(InstanceContext {
      instance: instance.clone(),
      host: host.clone(),
      configuration: configuration.clone(),
      rulesets,
    })
  }

  pub fn record_install(&mut self, id: EntityId) -> Result<(), ProbeError> {
    let inst = self
      .instances
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("instance", id))?;
    inst.installed = true;
    Ok(())
  }

  pub fn record_rules_deployed(&mut self, id: EntityId, now_ms: u64) -> Result<(), ProbeError> {
    let inst = self
      .instances
      .get_mut(&id)
      .ok_or_else(|| ProbeError::not_found("instance", id))?;
    inst.rules_updated_at_unix_ms = Some(now_ms);
    Ok(())
  }

  pub fn subscriptions(&self) -> impl Iterator<Item = &FeedSubscription> {
    self.subscriptions.values()
  }

  pub fn subscription_by_key(&self, api_key: &str) -> Option<&FeedSubscription> {
    self.subscriptions.values().find(|s| s.api_key == api_key)
  }

  pub fn add_subscription(
    &mut self,
    api_key: &str,
    pull_schedule: Crontab,
    instances: Vec<EntityId>,
  ) -> Result<FeedSubscription, ProbeError> {
    let api_key = required("api_key", api_key)?;
    if self.subscription_by_key(&api_key).is_some() {
      return Err(ProbeError::duplicate("subscription", api_key));
    }
    if let Some(missing) = instances.iter().find(|i| !self.instances.contains_key(*i)) {
      return Err(ProbeError::not_found("instance", missing));
    }
    let sub = FeedSubscription {
      id: self.allocate_id(),
      api_key,
      pull_schedule,
      instances,
    };
    self.subscriptions.insert(sub.id, sub.clone());
    Ok(sub)
  }

  pub fn delete_subscription(&mut self, api_key: &str) -> Result<FeedSubscription, ProbeError> {
    let id = self
      .subscription_by_key(api_key)
      .map(|s| s.id)
      .ok_or_else(|| ProbeError::not_found("subscription", api_key))?;
    self
      .subscriptions
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("subscription", api_key))
  }

  /// Instances attached to a subscription, paired with their hosts. Dangling references
  /// are skipped.
  pub fn subscription_targets(&self, sub: &FeedSubscription) -> Vec<(Instance, Host)> {
    sub
      .instances
      .iter()
      .filter_map(|id| {
        let inst = self.instances.get(id)?;
        let host = self.hosts.get(&inst.host)?;
        Some((inst.clone(), host.clone()))
      })
      .collect()
  }

  pub fn indicators(&self) -> impl Iterator<Item = &IntelIndicator> {
    self.indicators.values()
  }

  pub fn add_indicator(&mut self, draft: IndicatorDraft) -> Result<IntelIndicator, ProbeError> {
    let value = required("value", &draft.value)?;
    crate::intel::check_indicator_type(&draft.indicator_type)?;
    if crate::intel::has_field_separator(&[
      &value,
      &draft.meta_source,
      &draft.meta_desc,
      &draft.meta_url,
    ]) {
      return Err(ProbeError::invalid("indicator", "fields may not contain tabs or newlines"));
    }
    if self
      .indicators
      .values()
      .any(|i| i.value == value && i.indicator_type == draft.indicator_type)
    {
      return Err(ProbeError::duplicate(
        "indicator",
        format!("{}-{}", draft.indicator_type, value),
      ));
    }
    let ind = IntelIndicator {
      id: self.allocate_id(),
      value,
      indicator_type: draft.indicator_type,
      meta_source: draft.meta_source,
      meta_desc: draft.meta_desc,
      meta_url: draft.meta_url,
    };
    self.indicators.insert(ind.id, ind.clone());
    Ok(ind)
  }

  pub fn delete_indicator(&mut self, id: EntityId) -> Result<IntelIndicator, ProbeError> {
    self
      .indicators
      .remove(&id)
      .ok_or_else(|| ProbeError::not_found("indicator", id))
  }
}

fn required(field: &'static str, raw: &str) -> Result<String, ProbeError> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(ProbeError::invalid(field, "must not be empty"));
  }
  Ok(trimmed.to_string())
}

fn required_body(raw: &str) -> Result<String, ProbeError> {
  let body = normalize_rule_text(raw);
  if body.trim().is_empty() {
    return Err(ProbeError::invalid("body", "must not be empty"));
  }
  Ok(body)
}


#[cfg(test)]
mod tests {
  use super::fixtures::*;
  use super::*;

  #[test]
  fn signature_message_is_unique() {
    let mut cat = Catalog::default();
    cat.add_signature(sig("ssh-scan", true), 1).unwrap();
    let err = cat.add_signature(sig("ssh-scan", true), 2).unwrap_err();
    assert!(matches!(err, ProbeError::Duplicate { kind: "signature", .. }));
  }

  #[test]
  fn empty_body_is_rejected_and_carriage_returns_stripped() {
    let mut cat = Catalog::default();
    let mut draft = sig("a", true);
    draft.body = " \r\n".to_string();
    assert!(matches!(
      cat.add_signature(draft, 1),
      Err(ProbeError::InvalidInput { field: "body", .. })
    ));

    let mut draft = sig("b", true);
    draft.body = "signature b {\r\n}\r\n".to_string();
    let s = cat.add_signature(draft, 1).unwrap();
    assert_eq!(s.body, "signature b {\n}\n");
  }

  #[test]
  fn deleting_a_rule_detaches_it_from_rulesets() {
    let mut cat = Catalog::default();
    let s = cat.add_signature(sig("a", true), 1).unwrap();
    let rs = cat.add_ruleset("web", "").unwrap();
    cat.add_to_ruleset(rs.id, RuleKind::Signature, s.id).unwrap();
    cat.add_to_ruleset(rs.id, RuleKind::Signature, s.id).unwrap();
    assert_eq!(cat.ruleset(rs.id).unwrap().signatures, vec![s.id]);

    cat.delete_signature(s.id).unwrap();
    assert!(cat.ruleset(rs.id).unwrap().signatures.is_empty());
  }

  #[test]
  fn resolve_instance_reads_current_rule_content() {
    let mut cat = Catalog::default();
    let s = cat.add_signature(sig("a", true), 1).unwrap();
    let rs = cat.add_ruleset("web", "").unwrap();
    cat.add_to_ruleset(rs.id, RuleKind::Signature, s.id).unwrap();
    let inst = instance(&mut cat, "sensor-1", vec![rs.id], false);

    cat.set_signature_enabled(s.id, false).unwrap();
    let ctx = cat.resolve_instance(inst.id).unwrap();
    assert_eq!(ctx.rulesets.len(), 1);
    assert!(!ctx.rulesets[0].signatures[0].enabled);
    assert_eq!(ctx.host.name, "sensor-1-host");
  }

  #[test]
  fn instance_requires_existing_references() {
    let mut cat = Catalog::default();
    let err = cat
      .add_instance(InstanceDraft {
        name: "x".into(),
        description: String::new(),
        secure_deployment: false,
        configuration: 99,
        host: 98,
        rulesets: vec![],
        deploy_schedule: None,
        check_schedule: None,
      })
      .unwrap_err();
    assert!(matches!(err, ProbeError::NotFound { kind: "configuration", .. }));
  }

  #[test]
  fn hosts_in_use_cannot_be_deleted() {
    let mut cat = Catalog::default();
    let inst = instance(&mut cat, "sensor-1", vec![], false);
    assert!(cat.delete_host(inst.host).is_err());
    cat.delete_instance(inst.id).unwrap();
    assert!(cat.delete_host(inst.host).is_ok());
  }

  #[test]
  fn deleting_instance_detaches_it_from_subscriptions() {
    let mut cat = Catalog::default();
    let inst = instance(&mut cat, "sensor-1", vec![], false);
    let sched: Crontab = "0 * * * *".parse().unwrap();
    cat.add_subscription("KEY", sched, vec![inst.id]).unwrap();
    cat.delete_instance(inst.id).unwrap();
    assert!(cat.subscription_by_key("KEY").unwrap().instances.is_empty());
  }

  #[test]
  fn find_matches_body_substring() {
    let mut cat = Catalog::default();
    cat.add_signature(sig("alpha", true), 1).unwrap();
    cat.add_signature(sig("beta", true), 1).unwrap();
    let hits = cat.find_signatures("event \"beta\"");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].message, "beta");
  }

  #[test]
  fn indicators_are_unique_per_value_and_type() {
    let mut cat = Catalog::default();
    let draft = IndicatorDraft {
      value: "192.168.50.110".into(),
      indicator_type: "Intel::ADDR".into(),
      meta_source: "local".into(),
      meta_desc: String::new(),
      meta_url: String::new(),
    };
    let ind = cat.add_indicator(draft.clone()).unwrap();
    assert_eq!(ind.to_string(), "Intel::ADDR-192.168.50.110");
    assert!(matches!(
      cat.add_indicator(draft),
      Err(ProbeError::Duplicate { kind: "indicator", .. })
    ));
  }

  #[test]
  fn save_and_load_keep_ids_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let mut cat = Catalog::default();
    let first = cat.add_ruleset("a", "").unwrap();
    cat.save(&path).unwrap();

    let mut loaded = Catalog::load(&path).unwrap();
    let second = loaded.add_ruleset("b", "").unwrap();
    assert!(second.id > first.id);
    assert_eq!(loaded.ruleset_by_name("a").unwrap().id, first.id);
  }
}
