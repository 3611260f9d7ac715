use regex::Regex;
use std::sync::OnceLock;

use super::{Catalog, EntityId, RuleKind, SignatureDraft};
use crate::error::ProbeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
  pub id: EntityId,
  pub created: bool,
}

fn event_message() -> Option<&'static Regex> {
  static RE: OnceLock<Option<Regex>> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#"event *"(.*?)""#).ok()).as_ref()
}

/// Imports one signature from its rule text. The message is taken from the `event "..."`
/// clause; an existing signature with the same message has its body replaced. The
/// signature is then attached to every ruleset in `rulesets`.
pub fn import_signature_line(
  catalog: &mut Catalog,
  line: &str,
  rulesets: &[EntityId],
  now_ms: u64,
) -> Result<ImportOutcome, ProbeError> {
  let message = event_message()
    .and_then(|re| re.captures(line))
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().trim().to_string())
    .filter(|m| !m.is_empty())
    .ok_or_else(|| ProbeError::invalid("signature", "no `event \"...\"` clause found"))?;

  if let Some(missing) = rulesets.iter().find(|r| catalog.ruleset(**r).is_none()) {
    return Err(ProbeError::not_found("ruleset", missing));
  }

  let existing = catalog.signature_by_message(&message).cloned();
  let outcome = match existing {
    Some(sig) => {
      let draft = SignatureDraft {
        message,
        body: line.to_string(),
        enabled: sig.enabled,
        validation_capture: sig.validation_capture,
      };
      let updated = catalog.update_signature(sig.id, draft, now_ms)?;
      ImportOutcome {
        id: updated.id,
        created: false,
      }
    }
    None => {
      let draft = SignatureDraft {
        message,
        body: line.to_string(),
        enabled: true,
        validation_capture: None,
      };
      let created = catalog.add_signature(draft, now_ms)?;
      ImportOutcome {
        id: created.id,
        created: true,
      }
    }
  };

  for rs in rulesets {
    catalog.add_to_ruleset(*rs, RuleKind::Signature, outcome.id)?;
  }
  Ok(outcome)
}

#[cfg(test)]
mod tests {
  use super::*;

  const LINE: &str = r#"signature http-shell { ip-proto == tcp payload /.*cmd\.exe/ event "Found root!" }"#;

  #[test]
  fn new_line_creates_enabled_signature_in_rulesets() {
    let mut cat = Catalog::default();
    let rs = cat.add_ruleset("imported", "").unwrap();
    let out = import_signature_line(&mut cat, LINE, &[rs.id], 10).unwrap();
    assert!(out.created);
    let sig = cat.signature(out.id).unwrap();
    assert_eq!(sig.message, "Found root!");
    assert!(sig.enabled);
    assert_eq!(cat.ruleset(rs.id).unwrap().signatures, vec![out.id]);
  }

  #[test]
  fn same_message_updates_body_in_place() {
    let mut cat = Catalog::default();
    let first = import_signature_line(&mut cat, LINE, &[], 10).unwrap();
    let changed = LINE.replace("cmd", "powershell");
    let second = import_signature_line(&mut cat, &changed, &[], 20).unwrap();
    assert_eq!(first.id, second.id);
    assert!(!second.created);
    let sig = cat.signature(first.id).unwrap();
    assert!(sig.body.contains("powershell"));
    assert_eq!(sig.updated_at_unix_ms, Some(20));
  }

  #[test]
  fn line_without_event_is_rejected() {
    let mut cat = Catalog::default();
    let err = import_signature_line(&mut cat, "signature x { ip-proto == tcp }", &[], 1).unwrap_err();
    assert!(matches!(err, ProbeError::InvalidInput { .. }));
    assert_eq!(cat.signatures().count(), 0);
  }
}
