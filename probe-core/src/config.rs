use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::Crontab;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub engine: EngineConfig,
  pub deploy: DeployConfig,
  pub remote: RemoteConfig,
  pub install: InstallConfig,
  pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

/// How the detection engine binary is invoked for rule validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
  #[serde(default = "default_engine_binary")]
  pub binary: String,

  /// Arguments placed between `binary` and the engine arguments, for when `binary` is a
  /// wrapper or interpreter rather than the engine itself.
  #[serde(default)]
  pub leading_args: Vec<String>,

  #[serde(default = "default_reference_capture")]
  pub reference_capture: String,

  #[serde(default = "default_script_packages")]
  pub script_packages: Vec<String>,

  #[serde(default = "default_signature_error_marker")]
  pub signature_error_marker: String,

  #[serde(default = "default_script_error_marker")]
  pub script_error_marker: String,

  #[serde(default = "default_signature_log")]
  pub signature_log: String,

  #[serde(default = "default_notice_log")]
  pub notice_log: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      binary: default_engine_binary(),
      leading_args: Vec::new(),
      reference_capture: default_reference_capture(),
      script_packages: default_script_packages(),
      signature_error_marker: default_signature_error_marker(),
      script_error_marker: default_script_error_marker(),
      signature_log: default_signature_log(),
      notice_log: default_notice_log(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
  #[serde(default = "default_remote_owner")]
  pub remote_owner: String,

  /// Octal permission string applied to every deployed file.
  #[serde(default = "default_file_mode")]
  pub file_mode: String,

  #[serde(default = "default_true")]
  pub require_validation_on_write: bool,

  #[serde(default)]
  pub workspace_dir: Option<String>,

  #[serde(default)]
  pub templates_dir: Option<String>,
}

impl Default for DeployConfig {
  fn default() -> Self {
    Self {
      remote_owner: default_remote_owner(),
      file_mode: default_file_mode(),
      require_validation_on_write: true,
      workspace_dir: None,
      templates_dir: None,
    }
  }
}

impl DeployConfig {
  pub fn mode_bits(&self) -> u32 {
    parse_mode(&self.file_mode).unwrap_or(0o600)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
  #[serde(default = "default_ssh_binary")]
  pub ssh_binary: String,

  #[serde(default = "default_scp_binary")]
  pub scp_binary: String,

  #[serde(default = "default_connect_timeout_seconds")]
  pub connect_timeout_seconds: u64,

  #[serde(default)]
  pub identity_file: Option<String>,

  #[serde(default = "default_become_command")]
  pub become_command: String,

  #[serde(default = "default_remote_tmp_dir")]
  pub remote_tmp_dir: String,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      ssh_binary: default_ssh_binary(),
      scp_binary: default_scp_binary(),
      connect_timeout_seconds: default_connect_timeout_seconds(),
      identity_file: None,
      become_command: default_become_command(),
      remote_tmp_dir: default_remote_tmp_dir(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
  #[serde(default = "default_engine_version")]
  pub version: String,
}

impl Default for InstallConfig {
  fn default() -> Self {
    Self {
      version: default_engine_version(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,

  #[serde(default = "default_tick_seconds")]
  pub tick_seconds: u64,

  #[serde(default = "default_check_schedule")]
  pub check_schedule: String,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      tick_seconds: default_tick_seconds(),
      check_schedule: default_check_schedule(),
    }
  }
}

impl SchedulerConfig {
  pub fn check_crontab(&self) -> Crontab {
    self
      .check_schedule
      .parse()
      .unwrap_or_else(|_| Crontab::every_minutes(5))
  }
}

impl Config {
  pub fn workspace_root(&self, base: &Path) -> PathBuf {
    match self.deploy.workspace_dir.as_deref() {
      Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
      _ => crate::paths::workspace_dir(base),
    }
  }

  pub fn templates_root(&self, base: &Path) -> PathBuf {
    match self.deploy.templates_dir.as_deref() {
      Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
      _ => crate::paths::templates_dir(base),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

fn default_engine_binary() -> String {
  "/usr/local/bro/bin/bro".to_string()
}

fn default_reference_capture() -> String {
  "/usr/local/share/probe-manager/test-signature.pcap".to_string()
}

fn default_script_packages() -> Vec<String> {
  vec![
    "standalone".to_string(),
    "local".to_string(),
    "bro local.bro broctl broctl/standalone broctl/auto".to_string(),
  ]
}

fn default_signature_error_marker() -> String {
  "Error in signature".to_string()
}

fn default_script_error_marker() -> String {
  "error in ".to_string()
}

fn default_signature_log() -> String {
  "signatures.log".to_string()
}

fn default_notice_log() -> String {
  "notice.log".to_string()
}

fn default_remote_owner() -> String {
  "root".to_string()
}

fn default_file_mode() -> String {
  "0600".to_string()
}

fn default_ssh_binary() -> String {
  "ssh".to_string()
}

fn default_scp_binary() -> String {
  "scp".to_string()
}

fn default_connect_timeout_seconds() -> u64 {
  10
}

fn default_become_command() -> String {
  "sudo".to_string()
}

fn default_remote_tmp_dir() -> String {
  "/tmp".to_string()
}

fn default_engine_version() -> String {
  "2.5.3".to_string()
}

fn default_tick_seconds() -> u64 {
  30
}

fn default_check_schedule() -> String {
  "*/5 * * * *".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub engine: Option<EngineConfig>,

  #[serde(default)]
  pub deploy: Option<DeployConfig>,

  #[serde(default)]
  pub remote: Option<RemoteConfig>,

  #[serde(default)]
  pub install: Option<InstallConfig>,

  #[serde(default)]
  pub scheduler: Option<SchedulerConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(e) = self.engine {
      cfg.engine = e;
    }
    if let Some(d) = self.deploy {
      cfg.deploy = d;
    }
    if let Some(r) = self.remote {
      cfg.remote = r;
    }
    if let Some(i) = self.install {
      cfg.install = i;
    }
    if let Some(s) = self.scheduler {
      cfg.scheduler = s;
    }

    if parse_mode(&cfg.deploy.file_mode).is_none() {
      tracing::warn!(
        file_mode = %cfg.deploy.file_mode,
        "deploy.file_mode is not an octal mode; using 0600"
      );
      cfg.deploy.file_mode = default_file_mode();
    }

    if let Some(reason) = validate_scheduler_config(&cfg.scheduler) {
      cfg.scheduler.enabled = false;
      tracing::warn!(reason = %reason, "scheduler config invalid; periodic jobs disabled");
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none()
      || self.engine.is_none()
      || self.deploy.is_none()
      || self.remote.is_none()
      || self.install.is_none()
      || self.scheduler.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    } else {
      eprintln!(
        "probe-core: config missing at {}; using defaults (read-only).",
        path.display()
      );
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if allow_writes && upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", unix_seconds()));
        let _ = fs::copy(path, &backup);
        write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
        eprintln!(
          "probe-core: missing config sections filled in at {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      if allow_writes {
        let backup = parent.join(format!("config.toml.bad-{}", unix_seconds()));
        let _ = fs::rename(path, &backup);
        write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
        eprintln!(
          "probe-core: invalid config at {} (moved to {}): {e}",
          path.display(),
          backup.display()
        );
      } else {
        eprintln!(
          "probe-core: invalid config at {}; using defaults (read-only): {e}",
          path.display()
        );
      }
      Ok(cfg)
    }
  }
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    logging: Some(cfg.logging.clone()),
    engine: Some(cfg.engine.clone()),
    deploy: Some(cfg.deploy.clone()),
    remote: Some(cfg.remote.clone()),
    install: Some(cfg.install.clone()),
    scheduler: Some(cfg.scheduler.clone()),
  }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn unix_seconds() -> u64 {
  crate::types::now_unix_ms() / 1000
}

fn parse_mode(raw: &str) -> Option<u32> {
  let digits = raw.trim().trim_start_matches("0o");
  if digits.is_empty() || digits.len() > 4 {
    return None;
  }
  u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

fn validate_scheduler_config(cfg: &SchedulerConfig) -> Option<String> {
  if cfg.tick_seconds == 0 {
    return Some("tick_seconds must be > 0".to_string());
  }
  if cfg.tick_seconds > 60 {
    return Some("tick_seconds must be <= 60 so no crontab minute is skipped".to_string());
  }
  if let Err(e) = cfg.check_schedule.parse::<Crontab>() {
    return Some(format!("check_schedule: {e}"));
  }
  None
}
