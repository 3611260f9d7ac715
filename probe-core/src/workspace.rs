//! Private scratch directories for validation runs and deploy staging.
//!
//! Every directory is namespaced by the entity it serves (`validate-signature-12-…`,
//! `deploy-instance-4-…`) plus a random suffix, so concurrent work on different entities
//! never shares a path. The directory and everything the engine drops into it is removed
//! when the `ScopedWorkspace` goes out of scope, whichever way the caller leaves.

use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct ScopedWorkspace {
  dir: TempDir,
}

impl ScopedWorkspace {
  pub fn acquire(root: &Path, namespace: &str) -> anyhow::Result<Self> {
    fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
    let dir = tempfile::Builder::new()
      .prefix(&format!("{}-", sanitize(namespace)))
      .tempdir_in(root)
      .with_context(|| format!("create workspace under {}", root.display()))?;
    restrict_dir(dir.path())?;
    Ok(Self { dir })
  }

  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  /// Writes `contents` to `name` inside the workspace, readable by the owner only.
  pub fn write_private(&self, name: &str, contents: &str) -> anyhow::Result<PathBuf> {
    let path = self.dir.path().join(sanitize(name));
    let mut file = open_private(&path).with_context(|| format!("create {}", path.display()))?;
    file
      .write_all(contents.as_bytes())
      .with_context(|| format!("write {}", path.display()))?;
    file.flush()?;
    Ok(path)
  }

  pub fn read_optional(&self, name: &str) -> Option<String> {
    fs::read_to_string(self.dir.path().join(name)).ok()
  }
}

fn sanitize(raw: &str) -> String {
  let cleaned: String = raw
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();
  let trimmed = cleaned.trim_start_matches('.');
  if trimmed.is_empty() {
    "entry".to_string()
  } else {
    trimmed.to_string()
  }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
  use std::os::unix::fs::OpenOptionsExt;
  fs::OpenOptions::new()
    .write(true)
    .create(true)
    .truncate(true)
    .mode(0o600)
    .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
  fs::File::create(path)
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> anyhow::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o700))
    .with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> anyhow::Result<()> {
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn directory_is_removed_on_drop() {
    let root = tempfile::tempdir().unwrap();
    let kept_path;
    {
      let ws = ScopedWorkspace::acquire(root.path(), "validate-signature-7").unwrap();
      ws.write_private("7.sig", "signature s1 {}").unwrap();
      fs::write(ws.path().join("signatures.log"), "engine output").unwrap();
      kept_path = ws.path().to_path_buf();
      assert!(kept_path.exists());
    }
    assert!(!kept_path.exists());
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
  }

  #[test]
  fn namespace_is_visible_in_directory_name() {
    let root = tempfile::tempdir().unwrap();
    let ws = ScopedWorkspace::acquire(root.path(), "deploy instance/4").unwrap();
    let name = ws.path().file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("deploy_instance_4-"));
  }

  #[cfg(unix)]
  #[test]
  fn written_files_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let root = tempfile::tempdir().unwrap();
    let ws = ScopedWorkspace::acquire(root.path(), "perm").unwrap();
    let p = ws.write_private("../escape.txt", "x").unwrap();
    assert_eq!(p.parent().unwrap(), ws.path());
    let mode = fs::metadata(&p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
  }
}
