//! Rule validation against the detection engine binary.
//!
//! Every run gets its own `ScopedWorkspace`: the rule text is written there, the engine
//! runs with it as working directory (so the logs it produces land there too) and the
//! whole directory disappears when the run returns.

mod engine;

use std::path::{Path, PathBuf};

use crate::catalog::{RuleKind, Script, Signature};
use crate::config::EngineConfig;
use crate::error::{short_error, ProbeError};
use crate::types::normalize_rule_text;
use crate::workspace::ScopedWorkspace;

const ALERT_NOT_GENERATED: &str = "Alert not generated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
  pub ok: bool,
  pub diagnostics: String,
}

impl ValidationReport {
  pub fn passed() -> Self {
    Self {
      ok: true,
      diagnostics: String::new(),
    }
  }

  pub fn failed(diagnostics: impl Into<String>) -> Self {
    Self {
      ok: false,
      diagnostics: diagnostics.into(),
    }
  }

  pub fn to_error(&self, rule: &str) -> Option<ProbeError> {
    (!self.ok).then(|| ProbeError::ValidationFailure {
      rule: rule.to_string(),
      diagnostics: self.diagnostics.clone(),
    })
  }
}

/// Full check of a stored rule: syntax, plus the capture check when the rule has one.
pub trait RuleCheck: Send + Sync {
  fn check_signature(&self, sig: &Signature) -> ValidationReport;
  fn check_script(&self, script: &Script) -> ValidationReport;
}

pub struct RuleValidator {
  engine: EngineConfig,
  workspace_root: PathBuf,
}

impl RuleValidator {
  pub fn new(engine: EngineConfig, workspace_root: PathBuf) -> Self {
    Self {
      engine,
      workspace_root,
    }
  }

  /// Syntax check of `body` against the reference capture.
  pub fn validate(&self, kind: RuleKind, key: &str, body: &str) -> ValidationReport {
    let marker = match kind {
      RuleKind::Signature => self.engine.signature_error_marker.as_str(),
      RuleKind::Script => self.engine.script_error_marker.as_str(),
    };
    let run = self.run_in_workspace("validate", kind, key, body, |file| match kind {
      RuleKind::Signature => vec![
        "-s".to_string(),
        file,
        "-r".to_string(),
        self.engine.reference_capture.clone(),
      ],
      RuleKind::Script => {
        let mut args = vec!["-a".to_string(), file];
        args.extend(self.package_args());
        args
      }
    });

    match run {
      Ok((run, _)) if run.output_contains(marker) => ValidationReport::failed(run.diagnostics()),
      Ok((run, _)) if !run.success => ValidationReport::failed(run.diagnostics()),
      Ok(_) => ValidationReport::passed(),
      Err(report) => report,
    }
  }

  /// Runs `body` over `capture` and requires `expected_marker` in the engine's log.
  pub fn validate_against_capture(
    &self,
    kind: RuleKind,
    key: &str,
    body: &str,
    capture: &Path,
    expected_marker: &str,
  ) -> ValidationReport {
    let capture = capture.display().to_string();
    let run = self.run_in_workspace("capture", kind, key, body, |file| match kind {
      RuleKind::Signature => vec!["-r".to_string(), capture.clone(), "-s".to_string(), file],
      RuleKind::Script => {
        let mut args = vec!["-r".to_string(), capture.clone(), file];
        args.extend(self.package_args());
        args
      }
    });

    let report = match run {
      Ok((run, log)) => {
        let alerted = log.is_some_and(|text| text.contains(expected_marker));
        if run.success && alerted {
          ValidationReport::passed()
        } else {
          let stderr = run.stderr.trim();
          if stderr.is_empty() {
            ValidationReport::failed(ALERT_NOT_GENERATED)
          } else {
            ValidationReport::failed(format!("{stderr}\n{ALERT_NOT_GENERATED}"))
          }
        }
      }
      Err(report) => report,
    };
    if !report.ok {
      tracing::info!(kind = %kind, key = %key, capture = %capture, "capture check produced no alert");
    }
    report
  }

  pub fn validate_signature(&self, sig: &Signature) -> ValidationReport {
    let key = sig.id.to_string();
    let mut failures = Vec::new();
    let syntax = self.validate(RuleKind::Signature, &key, &sig.body);
    if !syntax.ok {
      failures.push(format!("{sig} : {}", syntax.diagnostics));
    }
    if let Some(capture) = sig.validation_capture.as_deref() {
      let res =
        self.validate_against_capture(RuleKind::Signature, &key, &sig.body, capture, &sig.message);
      if !res.ok {
        failures.push(format!("{sig} : {}", res.diagnostics));
      }
    }
    collect(failures)
  }

  pub fn validate_script(&self, script: &Script) -> ValidationReport {
    let key = script.id.to_string();
    let mut failures = Vec::new();
    let syntax = self.validate(RuleKind::Script, &key, &script.body);
    if !syntax.ok {
      failures.push(format!("{script} : {}", syntax.diagnostics));
    }
    if let Some(capture) = script.validation_capture.as_deref() {
      let res =
        self.validate_against_capture(RuleKind::Script, &key, &script.body, capture, &script.name);
      if !res.ok {
        failures.push(format!("{script} : {}", res.diagnostics));
      }
    }
    collect(failures)
  }

  fn package_args(&self) -> Vec<String> {
    self
      .engine
      .script_packages
      .iter()
      .flat_map(|p| ["-p".to_string(), p.clone()])
      .collect()
  }

  /// Writes the rule into a fresh workspace and runs the engine there. Returns the run and
  /// the engine log for `kind` if one was produced.
  fn run_in_workspace(
    &self,
    purpose: &str,
    kind: RuleKind,
    key: &str,
    body: &str,
    build_args: impl FnOnce(String) -> Vec<String>,
  ) -> Result<(engine::EngineRun, Option<String>), ValidationReport> {
    let body = normalize_rule_text(body);
    if body.trim().is_empty() {
      return Err(ValidationReport::failed("rule body is empty"));
    }

    let ws = ScopedWorkspace::acquire(&self.workspace_root, &format!("{purpose}-{kind}-{key}"))
      .map_err(|e| ValidationReport::failed(short_error(&e)))?;
    let file = ws
      .write_private(&format!("{key}.{}", kind.file_extension()), &body)
      .map_err(|e| ValidationReport::failed(short_error(&e)))?;

    let args = build_args(file.display().to_string());
    let run = engine::run(&self.engine, &args, ws.path())
      .map_err(|e| ValidationReport::failed(short_error(&e)))?;

    let log_name = match kind {
      RuleKind::Signature => &self.engine.signature_log,
      RuleKind::Script => &self.engine.notice_log,
    };
    let log = ws.read_optional(log_name);
    Ok((run, log))
  }
}

impl RuleCheck for RuleValidator {
  fn check_signature(&self, sig: &Signature) -> ValidationReport {
    self.validate_signature(sig)
  }

  fn check_script(&self, script: &Script) -> ValidationReport {
    self.validate_script(script)
  }
}

fn collect(failures: Vec<String>) -> ValidationReport {
  if failures.is_empty() {
    ValidationReport::passed()
  } else {
    ValidationReport::failed(failures.join("\n"))
  }
}
