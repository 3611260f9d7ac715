use thiserror::Error;

/// Failure categories. Remote operations carry them inside `OpResult` or one of the
/// specialised reports; catalog edits return them directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
  #[error("validation failed for {rule}: {diagnostics}")]
  ValidationFailure { rule: String, diagnostics: String },

  #[error("copy to {destination} failed: {reason}")]
  DeployPartialFailure { destination: String, reason: String },

  #[error("remote step `{step}` on {host} failed: {reason}")]
  RemoteUnavailable {
    host: String,
    step: String,
    reason: String,
  },

  #[error("instance `{0}` is not installed")]
  NotInstalled(String),

  #[error("{kind} `{key}` not found")]
  NotFound { kind: &'static str, key: String },

  #[error("{kind} `{key}` already exists")]
  Duplicate { kind: &'static str, key: String },

  #[error("invalid {field}: {reason}")]
  InvalidInput { field: &'static str, reason: String },

  #[error("operating system `{0}` is not supported")]
  UnsupportedOs(String),

  #[error("catalog storage failed: {0}")]
  Storage(String),
}

impl ProbeError {
  pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
    Self::NotFound {
      kind,
      key: key.to_string(),
    }
  }

  pub fn duplicate(kind: &'static str, key: impl ToString) -> Self {
    Self::Duplicate {
      kind,
      key: key.to_string(),
    }
  }

  pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    Self::InvalidInput {
      field,
      reason: reason.into(),
    }
  }

  pub fn remote(host: &str, step: &str, err: &anyhow::Error) -> Self {
    Self::RemoteUnavailable {
      host: host.to_string(),
      step: step.to_string(),
      reason: short_error(err),
    }
  }

  pub fn storage(err: &anyhow::Error) -> Self {
    Self::Storage(short_error(err))
  }

  pub fn copy_failed(destination: &str, err: &anyhow::Error) -> Self {
    Self::DeployPartialFailure {
      destination: destination.to_string(),
      reason: short_error(err),
    }
  }
}

/// Single-line rendering of an error chain, capped so job records and logs stay readable.
pub fn short_error(e: &anyhow::Error) -> String {
  let text = format!("{e:#}");
  let count = text.chars().count();
  if count <= 400 {
    return text;
  }
  let prefix: String = text.chars().take(400).collect();
  format!("{prefix}...")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_error_keeps_context_chain() {
    let err = anyhow::anyhow!("connection refused").context("scp to sensor-1");
    assert_eq!(short_error(&err), "scp to sensor-1: connection refused");
  }

  #[test]
  fn short_error_truncates_long_output() {
    let err = anyhow::anyhow!("{}", "x".repeat(1000));
    let text = short_error(&err);
    assert!(text.ends_with("..."));
    assert_eq!(text.chars().count(), 403);
  }
}
