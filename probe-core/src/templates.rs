use anyhow::Context;
use std::fs;
use std::path::Path;

use crate::catalog::ConfigTexts;

const CONTROL_DEFAULT: &str = include_str!("../templates/default-broctl.cfg");
const NODE_DEFAULT: &str = include_str!("../templates/default-node.cfg");
const NETWORKS_DEFAULT: &str = include_str!("../templates/default-networks.cfg");
const LOCAL_POLICY_DEFAULT: &str = include_str!("../templates/default-local.bro");
const INTEL_POLICY_DEFAULT: &str = include_str!("../templates/intel-policy.bro");

const INTEL_FILE_PLACEHOLDER: &str = "${intel_file}";

/// Default configuration texts. Read once at startup and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
  pub control: String,
  pub node: String,
  pub networks: String,
  pub local_policy: String,
  pub intel_policy: String,
}

impl Default for Templates {
  fn default() -> Self {
    Self {
      control: CONTROL_DEFAULT.to_string(),
      node: NODE_DEFAULT.to_string(),
      networks: NETWORKS_DEFAULT.to_string(),
      local_policy: LOCAL_POLICY_DEFAULT.to_string(),
      intel_policy: INTEL_POLICY_DEFAULT.to_string(),
    }
  }
}

impl Templates {
  /// Site overrides in `dir` win over the built-in defaults, file by file.
  pub fn load(dir: &Path) -> anyhow::Result<Self> {
    let defaults = Self::default();
    Ok(Self {
      control: read_override(dir, "default-broctl.cfg", defaults.control)?,
      node: read_override(dir, "default-node.cfg", defaults.node)?,
      networks: read_override(dir, "default-networks.cfg", defaults.networks)?,
      local_policy: read_override(dir, "default-local.bro", defaults.local_policy)?,
      intel_policy: read_override(dir, "intel-policy.bro", defaults.intel_policy)?,
    })
  }

  pub fn config_texts(&self) -> ConfigTexts {
    ConfigTexts {
      control: self.control.clone(),
      node: self.node.clone(),
      networks: self.networks.clone(),
      local_policy: self.local_policy.clone(),
    }
  }

  pub fn render_intel_policy(&self, intel_data_path: &str) -> String {
    self.intel_policy.replace(INTEL_FILE_PLACEHOLDER, intel_data_path)
  }
}

fn read_override(dir: &Path, name: &str, fallback: String) -> anyhow::Result<String> {
  let path = dir.join(name);
  if !path.exists() {
    return Ok(fallback);
  }
  let text = fs::read_to_string(&path).with_context(|| format!("read template {}", path.display()))?;
  tracing::info!(template = %path.display(), "using site template override");
  Ok(text)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn overrides_replace_only_present_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("default-node.cfg"), "[bro]\ntype=standalone\n").unwrap();
    let t = Templates::load(dir.path()).unwrap();
    assert_eq!(t.node, "[bro]\ntype=standalone\n");
    assert_eq!(t.networks, NETWORKS_DEFAULT);
  }

  #[test]
  fn intel_policy_points_at_data_file() {
    let t = Templates::default();
    let rendered = t.render_intel_policy("/usr/local/bro/share/bro/site/intel-1.dat");
    assert!(rendered.contains("\"/usr/local/bro/share/bro/site/intel-1.dat\""));
    assert!(!rendered.contains(INTEL_FILE_PLACEHOLDER));
  }
}
