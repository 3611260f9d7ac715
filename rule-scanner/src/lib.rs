mod rule_file;

use probe_core::catalog::RuleKind;
use probe_core::validator::{RuleValidator, ValidationReport};
use probe_core::{config, paths};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use rule_file::{split_signatures, SignatureBlock};

#[derive(Debug, Clone)]
pub struct ScanOptions {
  pub root: PathBuf,
  pub excludes: Vec<String>,
}

impl ScanOptions {
  pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
    let mut root = None;
    let mut excludes = Vec::new();
    let mut i = 1;
    while i < args.len() {
      match args[i].as_str() {
        "--exclude" => {
          if let Some(v) = args.get(i + 1) {
            excludes.push(v.clone());
            i += 2;
            continue;
          }
        }
        other if !other.starts_with("--") && root.is_none() => root = Some(PathBuf::from(other)),
        _ => {}
      }
      i += 1;
    }
    let root = root.ok_or_else(|| anyhow::anyhow!("expected: rule-scanner <dir> [--exclude <prefix>]"))?;
    Ok(Self { root, excludes })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
  pub file: PathBuf,
  pub rule: String,
  pub diagnostics: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
  pub files: u64,
  pub rules: u64,
  pub duplicates: u64,
  pub failures: Vec<RuleFailure>,
}

/// Validates every rule under `opts.root` with the engine configured for this host.
pub fn run(opts: &ScanOptions) -> anyhow::Result<ScanSummary> {
  tracing_subscriber::fmt()
    .with_ansi(false)
    .with_target(false)
    .init();

  let base = paths::base_dir()?;
  let cfg = config::load_or_default_readonly(&paths::config_path(&base))?;
  let validator = RuleValidator::new(cfg.engine.clone(), cfg.workspace_root(&base));

  println!("Rule scan starting: root={}", opts.root.display());
  let summary = scan(opts, |kind, key, body| validator.validate(kind, key, body))?;

  for f in &summary.failures {
    println!("FAIL {} {}: {}", f.file.display(), f.rule, f.diagnostics);
  }
  println!(
    "Scan complete: files={} rules={} duplicates={} failures={}",
    summary.files,
    summary.rules,
    summary.duplicates,
    summary.failures.len()
  );
  Ok(summary)
}

/// Walks `opts.root`, splitting signature files into blocks and treating each script file
/// as one rule. Identical rule bodies are validated once.
pub fn scan(
  opts: &ScanOptions,
  mut validate: impl FnMut(RuleKind, &str, &str) -> ValidationReport,
) -> anyhow::Result<ScanSummary> {
  if !opts.root.is_dir() {
    anyhow::bail!("not a directory: {}", opts.root.display());
  }

  let excludes: Vec<String> = opts
    .excludes
    .iter()
    .map(|s| s.to_ascii_lowercase())
    .collect();
  let mut summary = ScanSummary::default();
  let mut seen_hashes: HashSet<String> = HashSet::new();

  for entry in WalkDir::new(&opts.root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .flatten()
  {
    let p = entry.path();
    if entry.file_type().is_dir() || is_excluded(&excludes, p) {
      continue;
    }
    let Some(kind) = rule_kind(p) else {
      continue;
    };
    let text = match fs::read_to_string(p) {
      Ok(t) => t,
      Err(e) => {
        tracing::warn!(file = %p.display(), error = %e, "unreadable rule file skipped");
        continue;
      }
    };

    summary.files += 1;
    let rules: Vec<(String, String)> = match kind {
      RuleKind::Signature => split_signatures(&text)
        .into_iter()
        .map(|b| (b.name, b.body))
        .collect(),
      RuleKind::Script => vec![(file_stem(p), text)],
    };

    for (name, body) in rules {
      if !seen_hashes.insert(sha256_hex(&body)) {
        summary.duplicates += 1;
        continue;
      }
      summary.rules += 1;
      if summary.rules.is_multiple_of(50) {
        println!(
          "PROGRESS rules={} failures={} current={}",
          summary.rules,
          summary.failures.len(),
          safe_filename(p)
        );
      }

      let report = validate(kind, &name, &body);
      if !report.ok {
        summary.failures.push(RuleFailure {
          file: p.to_path_buf(),
          rule: name,
          diagnostics: report.diagnostics,
        });
      }
    }
  }

  Ok(summary)
}

fn rule_kind(p: &Path) -> Option<RuleKind> {
  let ext = p
    .extension()
    .and_then(|s| s.to_str())
    .unwrap_or("")
    .to_ascii_lowercase();
  match ext.as_str() {
    "sig" => Some(RuleKind::Signature),
    "bro" | "zeek" => Some(RuleKind::Script),
    _ => None,
  }
}

fn is_excluded(excludes: &[String], path: &Path) -> bool {
  let p = path.to_string_lossy().to_ascii_lowercase();
  excludes
    .iter()
    .any(|ex| !ex.trim().is_empty() && p.starts_with(ex))
}

fn file_stem(p: &Path) -> String {
  p.file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or("script")
    .to_string()
}

fn safe_filename(p: &Path) -> String {
  p.file_name()
    .and_then(|s| s.to_str())
    .unwrap_or("<file>")
    .to_string()
}

fn sha256_hex(text: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(text.as_bytes());
  format!("{:x}", hasher.finalize())
}
