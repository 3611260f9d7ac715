use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::scheduler::Crontab;

pub type EntityId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
  Signature,
  Script,
}

impl RuleKind {
  pub fn as_str(self) -> &'static str {
    match self {
      RuleKind::Signature => "signature",
      RuleKind::Script => "script",
    }
  }

  pub fn file_extension(self) -> &'static str {
    match self {
      RuleKind::Signature => "sig",
      RuleKind::Script => "bro",
    }
  }
}

impl fmt::Display for RuleKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Pattern-matching rule. `message` is the text the engine writes to its signature log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
  pub id: EntityId,
  pub message: String,
  pub body: String,
  pub enabled: bool,
  #[serde(default)]
  pub validation_capture: Option<PathBuf>,
  pub created_at_unix_ms: u64,
  #[serde(default)]
  pub updated_at_unix_ms: Option<u64>,
}

impl fmt::Display for Signature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} : {}", self.id, self.message)
  }
}

/// Engine script. `name` is the text its notices carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
  pub id: EntityId,
  pub name: String,
  pub body: String,
  pub enabled: bool,
  #[serde(default)]
  pub validation_capture: Option<PathBuf>,
  pub created_at_unix_ms: u64,
  #[serde(default)]
  pub updated_at_unix_ms: Option<u64>,
}

impl fmt::Display for Script {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDraft {
  pub message: String,
  pub body: String,
  #[serde(default = "enabled_by_default")]
  pub enabled: bool,
  #[serde(default)]
  pub validation_capture: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDraft {
  pub name: String,
  pub body: String,
  #[serde(default = "enabled_by_default")]
  pub enabled: bool,
  #[serde(default)]
  pub validation_capture: Option<PathBuf>,
}

fn enabled_by_default() -> bool {
  true
}

/// Named grouping of rules. Members are referenced, never owned; order is insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
  pub id: EntityId,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub signatures: Vec<EntityId>,
  #[serde(default)]
  pub scripts: Vec<EntityId>,
}

/// Where each managed file lives on the sensor host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePaths {
  pub rules_file: String,
  pub scripts_file: String,
  pub policy_dir: String,
  pub bin_dir: String,
  pub control_config: String,
  pub node_config: String,
  pub networks_config: String,
  pub local_policy: String,
  pub intel_policy: String,
  pub intel_data: String,
}

impl Default for RemotePaths {
  fn default() -> Self {
    Self {
      rules_file: "/usr/local/bro/share/bro/site/mysignatures.sig".to_string(),
      scripts_file: "/usr/local/bro/share/bro/site/myscripts.bro".to_string(),
      policy_dir: "/usr/local/bro/share/bro/policy/".to_string(),
      bin_dir: "/usr/local/bro/bin/".to_string(),
      control_config: "/usr/local/bro/etc/broctl.cfg".to_string(),
      node_config: "/usr/local/bro/etc/node.cfg".to_string(),
      networks_config: "/usr/local/bro/etc/networks.cfg".to_string(),
      local_policy: "/usr/local/bro/share/bro/site/local.bro".to_string(),
      intel_policy: "/usr/local/bro/share/bro/site/intel.bro".to_string(),
      intel_data: "/usr/local/bro/share/bro/site/intel-1.dat".to_string(),
    }
  }
}

impl RemotePaths {
  pub fn control_binary(&self) -> String {
    join_remote(&self.bin_dir, "broctl")
  }

  pub fn engine_binary(&self) -> String {
    join_remote(&self.bin_dir, "bro")
  }
}

fn join_remote(dir: &str, file: &str) -> String {
  format!("{}/{}", dir.trim_end_matches('/'), file)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTexts {
  pub control: String,
  pub node: String,
  pub networks: String,
  pub local_policy: String,
}

/// Reusable deployment configuration shared by any number of instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfiguration {
  pub id: EntityId,
  pub name: String,
  pub paths: RemotePaths,
  pub texts: ConfigTexts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
  Debian,
  Ubuntu,
}

impl OsFamily {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_ascii_lowercase().as_str() {
      "debian" => Some(Self::Debian),
      "ubuntu" => Some(Self::Ubuntu),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
  pub id: EntityId,
  pub name: String,
  pub address: String,
  #[serde(default = "default_ssh_port")]
  pub port: u16,
  #[serde(default = "default_ssh_user")]
  pub user: String,
  pub os: String,
}

impl Host {
  pub fn os_family(&self) -> Option<OsFamily> {
    OsFamily::parse(&self.os)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDraft {
  pub name: String,
  pub address: String,
  #[serde(default = "default_ssh_port")]
  pub port: u16,
  #[serde(default = "default_ssh_user")]
  pub user: String,
  pub os: String,
}

fn default_ssh_port() -> u16 {
  22
}

fn default_ssh_user() -> String {
  "root".to_string()
}

/// Display/dispatch tag for the engine an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineKind {
  #[default]
  Bro,
}

impl fmt::Display for EngineKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EngineKind::Bro => f.write_str("Bro"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
  pub id: EntityId,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub kind: EngineKind,
  #[serde(default)]
  pub installed: bool,
  #[serde(default)]
  pub secure_deployment: bool,
  pub configuration: EntityId,
  pub host: EntityId,
  #[serde(default)]
  pub rulesets: Vec<EntityId>,
  #[serde(default)]
  pub rules_updated_at_unix_ms: Option<u64>,
  #[serde(default)]
  pub deploy_schedule: Option<Crontab>,
  #[serde(default)]
  pub check_schedule: Option<Crontab>,
}

impl fmt::Display for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} : {}", self.name, self.description)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDraft {
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub secure_deployment: bool,
  pub configuration: EntityId,
  pub host: EntityId,
  #[serde(default)]
  pub rulesets: Vec<EntityId>,
  #[serde(default)]
  pub deploy_schedule: Option<Crontab>,
  #[serde(default)]
  pub check_schedule: Option<Crontab>,
}

/// Threat-intel marketplace subscription pulled onto a group of instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSubscription {
  pub id: EntityId,
  pub api_key: String,
  pub pull_schedule: Crontab,
  #[serde(default)]
  pub instances: Vec<EntityId>,
}

impl fmt::Display for FeedSubscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.api_key)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelIndicator {
  pub id: EntityId,
  pub value: String,
  pub indicator_type: String,
  #[serde(default)]
  pub meta_source: String,
  #[serde(default)]
  pub meta_desc: String,
  #[serde(default)]
  pub meta_url: String,
}

impl fmt::Display for IntelIndicator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.indicator_type, self.value)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorDraft {
  pub value: String,
  pub indicator_type: String,
  #[serde(default)]
  pub meta_source: String,
  #[serde(default)]
  pub meta_desc: String,
  #[serde(default)]
  pub meta_url: String,
}

/// A ruleset with its members materialised from the catalog at the moment of resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRuleSet {
  pub name: String,
  pub signatures: Vec<Signature>,
  pub scripts: Vec<Script>,
}
