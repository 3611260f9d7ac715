use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::{ConfigTexts, Host, RemotePaths};
use crate::compiler::Artifacts;
use crate::error::{short_error, ProbeError};
use crate::remote::FilePusher;
use crate::workspace::ScopedWorkspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
  pub label: &'static str,
  pub staging_name: &'static str,
  pub contents: String,
  pub destination: String,
}

/// Files shipped together to one instance. `key` namespaces the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployBundle {
  pub key: String,
  pub files: Vec<BundleFile>,
}

impl DeployBundle {
  pub fn rules(key: impl Into<String>, artifacts: &Artifacts, paths: &RemotePaths) -> Self {
    Self {
      key: key.into(),
      files: vec![
        BundleFile {
          label: "rules",
          staging_name: "rules.sig",
          contents: artifacts.rules_text.clone(),
          destination: paths.rules_file.clone(),
        },
        BundleFile {
          label: "scripts",
          staging_name: "scripts.bro",
          contents: artifacts.scripts_text(),
          destination: paths.scripts_file.clone(),
        },
      ],
    }
  }

  pub fn config(
    key: impl Into<String>,
    texts: &ConfigTexts,
    intel_policy: String,
    paths: &RemotePaths,
  ) -> Self {
    Self {
      key: key.into(),
      files: vec![
        BundleFile {
          label: "control",
          staging_name: "broctl.cfg",
          contents: texts.control.clone(),
          destination: paths.control_config.clone(),
        },
        BundleFile {
          label: "node",
          staging_name: "node.cfg",
          contents: texts.node.clone(),
          destination: paths.node_config.clone(),
        },
        BundleFile {
          label: "networks",
          staging_name: "networks.cfg",
          contents: texts.networks.clone(),
          destination: paths.networks_config.clone(),
        },
        BundleFile {
          label: "local_policy",
          staging_name: "local.bro",
          contents: texts.local_policy.clone(),
          destination: paths.local_policy.clone(),
        },
        BundleFile {
          label: "intel_policy",
          staging_name: "intel.bro",
          contents: intel_policy,
          destination: paths.intel_policy.clone(),
        },
      ],
    }
  }

  pub fn intel(key: impl Into<String>, data: String, paths: &RemotePaths) -> Self {
    Self {
      key: key.into(),
      files: vec![BundleFile {
        label: "intel_data",
        staging_name: "intel-1.dat",
        contents: data,
        destination: paths.intel_data.clone(),
      }],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
  pub ok: bool,
  pub copied: Vec<String>,
  pub errors: Vec<ProbeError>,
}

pub struct RemoteDeployer {
  pusher: Arc<dyn FilePusher>,
  staging_root: PathBuf,
  owner: String,
  mode: u32,
}

impl RemoteDeployer {
  pub fn new(pusher: Arc<dyn FilePusher>, staging_root: PathBuf, owner: String, mode: u32) -> Self {
    Self {
      pusher,
      staging_root,
      owner,
      mode,
    }
  }

  /// Stages every file of `bundle` locally, then copies each one to `host`. A failed copy
  /// does not stop the remaining ones. Never reloads the engine.
  pub fn deploy(&self, host: &Host, bundle: &DeployBundle) -> DeployReport {
    let ws = match ScopedWorkspace::acquire(&self.staging_root, &format!("deploy-{}", bundle.key)) {
      Ok(ws) => ws,
      Err(e) => {
        return DeployReport {
          ok: false,
          copied: Vec::new(),
          errors: vec![ProbeError::DeployPartialFailure {
            destination: "local staging".to_string(),
            reason: short_error(&e),
          }],
        };
      }
    };

    let mut copied = Vec::new();
    let mut errors = Vec::new();
    for file in &bundle.files {
      let staged = match ws.write_private(file.staging_name, &file.contents) {
        Ok(p) => p,
        Err(e) => {
          errors.push(ProbeError::copy_failed(&file.destination, &e));
          continue;
        }
      };
      match self
        .pusher
        .copy_file(host, &staged, &file.destination, &self.owner, self.mode, true)
      {
        Ok(()) => {
          tracing::info!(
            host = %host.address,
            file = file.label,
            destination = %file.destination,
            "file deployed"
          );
          copied.push(file.destination.clone());
        }
        Err(e) => {
          tracing::warn!(
            host = %host.address,
            file = file.label,
            destination = %file.destination,
            error = %short_error(&e),
            "file copy failed"
          );
          errors.push(ProbeError::copy_failed(&file.destination, &e));
        }
      }
    }

    DeployReport {
      ok: errors.is_empty(),
      copied,
      errors,
    }
  }
}
