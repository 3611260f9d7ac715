use crate::catalog::{OsFamily, RemotePaths};
use crate::error::ProbeError;
use crate::remote::{shell_quote, NamedCommand};

const BUILD_DEPENDENCIES: &[&str] = &[
  "cmake", "make", "gcc", "g++", "flex", "bison", "libpcap-dev", "libssl1.0-dev", "python-dev",
  "swig", "zlib1g-dev", "libmagic-dev", "libgeoip-dev", "sendmail", "libcap2-bin", "wget",
  "curl", "ca-certificates",
];

const DOWNLOAD_BASE: &str = "https://www.bro.org/downloads";
const BUILD_ROOT: &str = "/tmp/probe-engine-build";

/// Ordered source-build steps for `version`. Only the Debian family is provisioned.
pub fn install_steps(
  os: OsFamily,
  version: &str,
  paths: &RemotePaths,
) -> Result<Vec<NamedCommand>, ProbeError> {
  match os {
    OsFamily::Debian | OsFamily::Ubuntu => debian_steps(version, paths),
  }
}

fn debian_steps(version: &str, paths: &RemotePaths) -> Result<Vec<NamedCommand>, ProbeError> {
  check_version(version)?;
  let src = format!("bro-{version}");
  let tarball = format!("{src}.tar.gz");
  let build_dir = format!("{BUILD_ROOT}/{src}");
  let prefix = install_prefix(&paths.bin_dir);

  Ok(vec![
    NamedCommand::new(
      "install_packages",
      format!(
        "apt-get update && DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
        BUILD_DEPENDENCIES.join(" ")
      ),
    ),
    NamedCommand::new(
      "download",
      format!(
        "mkdir -p {BUILD_ROOT} && cd {BUILD_ROOT} && wget -q {DOWNLOAD_BASE}/{tarball} && tar xf {tarball}"
      ),
    ),
    NamedCommand::new(
      "build",
      format!(
        "cd {build_dir} && ./configure --prefix={} && make -j$(nproc)",
        shell_quote(&prefix)
      ),
    ),
    NamedCommand::new("make_install", format!("cd {build_dir} && make install")),
    NamedCommand::new("cleanup", format!("rm -rf {BUILD_ROOT}")),
    NamedCommand::new(
      "first_deploy",
      format!("{} deploy", shell_quote(&paths.control_binary())),
    ),
  ])
}

/// `1.2.3`, `2.6-beta2`; anything that would need quoting in a shell is refused.
fn check_version(version: &str) -> Result<(), ProbeError> {
  let ok = !version.is_empty()
    && version
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
  if ok {
    Ok(())
  } else {
    Err(ProbeError::invalid("version", format!("`{version}` is not a release number")))
  }
}

fn install_prefix(bin_dir: &str) -> String {
  let trimmed = bin_dir.trim_end_matches('/');
  match trimmed.strip_suffix("/bin") {
    Some(prefix) if !prefix.is_empty() => prefix.to_string(),
    _ => "/usr/local/bro".to_string(),
  }
}
