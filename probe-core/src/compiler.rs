use std::collections::HashSet;

use crate::catalog::{ResolvedRuleSet, Script, Signature};
use crate::types::normalize_rule_text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
  pub name: String,
  pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
  pub rules_text: String,
  pub script_files: Vec<ScriptFile>,
}

impl Artifacts {
  /// Contents of the single scripts file deployed to the sensor.
  pub fn scripts_text(&self) -> String {
    let mut out = String::new();
    for f in &self.script_files {
      out.push_str(&f.body);
      if !f.body.ends_with('\n') {
        out.push('\n');
      }
      out.push('\n');
    }
    out
  }

  pub fn is_empty(&self) -> bool {
    self.rules_text.is_empty() && self.script_files.is_empty()
  }
}

/// Enabled rules reachable from `rulesets`, each listed once, in ruleset then member order.
pub fn enabled_rules(rulesets: &[ResolvedRuleSet]) -> (Vec<&Signature>, Vec<&Script>) {
  let mut seen_sigs = HashSet::new();
  let mut seen_scripts = HashSet::new();
  let mut sigs = Vec::new();
  let mut scripts = Vec::new();
  for rs in rulesets {
    for s in rs.signatures.iter().filter(|s| s.enabled) {
      if seen_sigs.insert(s.id) {
        sigs.push(s);
      }
    }
    for s in rs.scripts.iter().filter(|s| s.enabled) {
      if seen_scripts.insert(s.id) {
        scripts.push(s);
      }
    }
  }
  (sigs, scripts)
}

pub fn compile(rulesets: &[ResolvedRuleSet]) -> Artifacts {
  let (sigs, scripts) = enabled_rules(rulesets);

  let mut rules_text = String::new();
  for s in sigs {
    let body = normalize_rule_text(&s.body);
    rules_text.push_str(&body);
    if !body.ends_with('\n') {
      rules_text.push('\n');
    }
  }

  let script_files = scripts
    .into_iter()
    .map(|s| ScriptFile {
      name: format!("{}.bro", s.id),
      body: normalize_rule_text(&s.body),
    })
    .collect();

  Artifacts {
    rules_text,
    script_files,
  }
}
