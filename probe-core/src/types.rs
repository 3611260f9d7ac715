use crate::error::ProbeError;

/// Outcome of a lifecycle, deploy or feed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResult {
  pub ok: bool,
  pub errors: Vec<ProbeError>,
}

impl OpResult {
  pub fn success() -> Self {
    Self {
      ok: true,
      errors: Vec::new(),
    }
  }

  pub fn failed(err: ProbeError) -> Self {
    Self {
      ok: false,
      errors: vec![err],
    }
  }

  pub fn from_errors(errors: Vec<ProbeError>) -> Self {
    Self {
      ok: errors.is_empty(),
      errors,
    }
  }

  pub fn merge(&mut self, other: OpResult) {
    self.ok &= other.ok;
    self.errors.extend(other.errors);
  }

  pub fn error_summary(&self) -> String {
    self
      .errors
      .iter()
      .map(|e| e.to_string())
      .collect::<Vec<_>>()
      .join("; ")
  }
}

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

/// Engine rule text is written with Unix line endings regardless of how it was entered.
pub fn normalize_rule_text(text: &str) -> String {
  text.replace('\r', "")
}
