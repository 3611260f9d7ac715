//! Critical Stack intel marketplace client driven on the sensors themselves.

use std::sync::Arc;

use crate::catalog::{Host, Instance};
use crate::error::ProbeError;
use crate::remote::{remote_error, shell_quote, CommandRunner, NamedCommand};
use crate::types::OpResult;

const CLIENT: &str = "critical-stack-intel";
const LIST_BANNER: &str = "Pulling feed list from the Intel Marketplace.";

pub type FeedReport = OpResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedList {
  pub ok: bool,
  pub feeds: Vec<String>,
  pub errors: Vec<ProbeError>,
}

pub struct FeedSync {
  runner: Arc<dyn CommandRunner>,
}

impl FeedSync {
  pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
    Self { runner }
  }

  /// `set_api -> set_restart -> pull` on every instance. One instance failing never stops
  /// the others; all failures come back together.
  pub fn pull(&self, api_key: &str, targets: &[(Instance, Host)]) -> FeedReport {
    let commands = pull_commands(api_key);
    let mut errors = Vec::new();
    for (instance, host) in targets {
      match self.runner.execute(host, &commands, true) {
        Ok(_) => tracing::info!(instance = %instance.name, "intel feeds pulled"),
        Err(e) => {
          let err = remote_error(host, "set_api", &e);
          tracing::warn!(instance = %instance.name, error = %err, "intel feed pull failed");
          errors.push(err);
        }
      }
    }
    OpResult::from_errors(errors)
  }

  /// Feeds the subscription gives access to, read from the first instance that answers.
  pub fn list_feeds(&self, api_key: &str, targets: &[(Instance, Host)]) -> FeedList {
    if targets.is_empty() {
      return FeedList {
        ok: false,
        feeds: Vec::new(),
        errors: vec![ProbeError::invalid("subscription", "no instance attached")],
      };
    }

    let commands = [
      NamedCommand::new("set_api", format!("{CLIENT} api {}", shell_quote(api_key))),
      NamedCommand::new("list", format!("{CLIENT} list")),
    ];
    let mut errors = Vec::new();
    for (instance, host) in targets {
      match self.runner.execute(host, &commands, true) {
        Ok(outputs) => {
          let raw = outputs
            .iter()
            .find(|o| o.name == "list")
            .map(|o| o.stdout.as_str())
            .unwrap_or_default();
          return FeedList {
            ok: true,
            feeds: parse_feed_list(raw),
            errors,
          };
        }
        Err(e) => {
          let err = remote_error(host, "set_api", &e);
          tracing::warn!(instance = %instance.name, error = %err, "intel feed list failed");
          errors.push(err);
        }
      }
    }
    FeedList {
      ok: false,
      feeds: Vec::new(),
      errors,
    }
  }
}

fn pull_commands(api_key: &str) -> [NamedCommand; 3] {
  [
    NamedCommand::new("set_api", format!("{CLIENT} api {}", shell_quote(api_key))),
    NamedCommand::new("set_restart", format!("{CLIENT} config --set bro.restart=true")),
    NamedCommand::new("pull", format!("{CLIENT} pull")),
  ]
}

fn parse_feed_list(raw: &str) -> Vec<String> {
  raw
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty() && *l != LIST_BANNER)
    .map(str::to_string)
    .collect()
}
