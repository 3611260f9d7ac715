//! Intel framework data file rendering.

use crate::catalog::IntelIndicator;
use crate::error::ProbeError;

pub const KNOWN_TYPES: &[&str] = &[
  "Intel::ADDR",
  "Intel::SUBNET",
  "Intel::URL",
  "Intel::SOFTWARE",
  "Intel::EMAIL",
  "Intel::DOMAIN",
  "Intel::USER_NAME",
  "Intel::CERT_HASH",
  "Intel::PUBKEY_HASH",
  "Intel::FILE_HASH",
  "Intel::FILE_NAME",
];

const HEADER: &str = "#fields\tindicator\tindicator_type\tmeta.source\tmeta.desc\tmeta.url\n";

pub fn check_indicator_type(raw: &str) -> Result<(), ProbeError> {
  if KNOWN_TYPES.contains(&raw) {
    Ok(())
  } else {
    Err(ProbeError::invalid(
      "indicator_type",
      format!("`{raw}` is not one of {}", KNOWN_TYPES.join(", ")),
    ))
  }
}

/// Tabs and newlines would break the tab-separated data file.
pub fn has_field_separator(fields: &[&str]) -> bool {
  fields.iter().any(|f| f.contains(['\t', '\n', '\r']))
}

/// Tab-separated intel file; empty meta fields are written as `-`.
pub fn render_data_file(indicators: &[IntelIndicator]) -> String {
  let mut out = String::from(HEADER);
  for ind in indicators {
    let row = [
      ind.value.as_str(),
      ind.indicator_type.as_str(),
      ind.meta_source.as_str(),
      ind.meta_desc.as_str(),
      ind.meta_url.as_str(),
    ]
    .map(|f| if f.trim().is_empty() { "-" } else { f });
    out.push_str(&row.join("\t"));
    out.push('\n');
  }
  out
}
