use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid crontab `{expr}`: {reason}")]
pub struct CrontabError {
  pub expr: String,
  pub reason: String,
}

/// Five-field crontab (`minute hour day-of-month month day-of-week`), evaluated in UTC.
///
/// Each field accepts `*`, `*/n`, `a`, `a-b`, `a-b/n` and comma lists of those. Day of week
/// runs 0-6 from Sunday, with 7 accepted as Sunday. When both day fields are restricted a
/// time matches if either one does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crontab {
  text: String,
  minutes: u64,
  hours: u64,
  days_of_month: u64,
  months: u64,
  days_of_week: u64,
  dom_any: bool,
  dow_any: bool,
}

struct FieldSpec {
  name: &'static str,
  min: u32,
  max: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day of month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day of week", min: 0, max: 7 };

impl Crontab {
  pub fn every_minutes(n: u32) -> Self {
    let step = n.clamp(1, 59);
    let text = if step == 1 {
      "* * * * *".to_string()
    } else {
      format!("*/{step} * * * *")
    };
    match text.parse() {
      Ok(c) => c,
      Err(_) => Self::every_minute(),
    }
  }

  fn every_minute() -> Self {
    Self {
      text: "* * * * *".to_string(),
      minutes: mask(0, 59),
      hours: mask(0, 23),
      days_of_month: mask(1, 31),
      months: mask(1, 12),
      days_of_week: mask(0, 6),
      dom_any: true,
      dow_any: true,
    }
  }

  pub fn matches(&self, at: DateTime<Utc>) -> bool {
    if !bit(self.minutes, at.minute())
      || !bit(self.hours, at.hour())
      || !bit(self.months, at.month())
    {
      return false;
    }
    let dom = bit(self.days_of_month, at.day());
    let dow = bit(self.days_of_week, at.weekday().num_days_from_sunday());
    match (self.dom_any, self.dow_any) {
      (true, true) => true,
      (true, false) => dow,
      (false, true) => dom,
      (false, false) => dom || dow,
    }
  }
}

impl FromStr for Crontab {
  type Err = CrontabError;

  fn from_str(raw: &str) -> Result<Self, Self::Err> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let err = |reason: String| CrontabError {
      expr: raw.to_string(),
      reason,
    };
    if fields.len() != 5 {
      return Err(err(format!("expected 5 fields, found {}", fields.len())));
    }

    let minutes = parse_field(fields[0], &MINUTE).map_err(err)?;
    let hours = parse_field(fields[1], &HOUR).map_err(err)?;
    let days_of_month = parse_field(fields[2], &DAY_OF_MONTH).map_err(err)?;
    let months = parse_field(fields[3], &MONTH).map_err(err)?;
    let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(err)?;
    if bit(days_of_week, 7) {
      days_of_week = (days_of_week & !(1 << 7)) | 1;
    }

    Ok(Self {
      text: fields.join(" "),
      minutes,
      hours,
      days_of_month,
      months,
      days_of_week,
      dom_any: fields[2] == "*",
      dow_any: fields[4] == "*",
    })
  }
}

impl TryFrom<String> for Crontab {
  type Error = CrontabError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Crontab> for String {
  fn from(value: Crontab) -> Self {
    value.text
  }
}

impl fmt::Display for Crontab {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}

fn parse_field(raw: &str, spec: &FieldSpec) -> Result<u64, String> {
  let mut out = 0u64;
  for part in raw.split(',') {
    out |= parse_part(part, spec)?;
  }
  Ok(out)
}

fn parse_part(part: &str, spec: &FieldSpec) -> Result<u64, String> {
  let (range, step) = match part.split_once('/') {
    Some((r, s)) => {
      let step: u32 = s
        .parse()
        .map_err(|_| format!("{}: bad step `{s}`", spec.name))?;
      if step == 0 {
        return Err(format!("{}: step must be > 0", spec.name));
      }
      (r, step)
    }
    None => (part, 1),
  };

  let (lo, hi) = if range == "*" {
    (spec.min, spec.max)
  } else if let Some((a, b)) = range.split_once('-') {
    (number(a, spec)?, number(b, spec)?)
  } else {
    let n = number(range, spec)?;
    // `5/15` means "from 5 to the end, every 15".
    if part.contains('/') {
      (n, spec.max)
    } else {
      (n, n)
    }
  };
  if lo > hi {
    return Err(format!("{}: range {lo}-{hi} is reversed", spec.name));
  }

  let mut out = 0u64;
  let mut v = lo;
  while v <= hi {
    out |= 1 << v;
    match v.checked_add(step) {
      Some(next) => v = next,
      None => break,
    }
  }
  Ok(out)
}

fn number(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
  let n: u32 = raw
    .parse()
    .map_err(|_| format!("{}: `{raw}` is not a number", spec.name))?;
  if n < spec.min || n > spec.max {
    return Err(format!(
      "{}: {n} outside {}-{}",
      spec.name, spec.min, spec.max
    ));
  }
  Ok(n)
}

fn mask(lo: u32, hi: u32) -> u64 {
  (lo..=hi).fold(0, |acc, v| acc | (1 << v))
}

fn bit(set: u64, v: u32) -> bool {
  v < 64 && set & (1 << v) != 0
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
  }

  #[test]
  fn step_minutes() {
    let c: Crontab = "*/15 * * * *".parse().unwrap();
    assert!(c.matches(at(2026, 3, 4, 10, 0)));
    assert!(c.matches(at(2026, 3, 4, 10, 45)));
    assert!(!c.matches(at(2026, 3, 4, 10, 46)));
  }

  #[test]
  fn ranges_lists_and_sunday_alias() {
    let c: Crontab = "30 2-4,22 * * 7".parse().unwrap();
    // 2026-03-01 is a Sunday.
    assert!(c.matches(at(2026, 3, 1, 3, 30)));
    assert!(c.matches(at(2026, 3, 1, 22, 30)));
    assert!(!c.matches(at(2026, 3, 2, 3, 30)));
    assert!(!c.matches(at(2026, 3, 1, 5, 30)));
  }

  #[test]
  fn restricted_day_fields_match_either() {
    let c: Crontab = "0 0 1 * 1".parse().unwrap();
    assert!(c.matches(at(2026, 4, 1, 0, 0)));
    // 2026-04-06 is a Monday.
    assert!(c.matches(at(2026, 4, 6, 0, 0)));
    assert!(!c.matches(at(2026, 4, 7, 0, 0)));
  }

  #[test]
  fn display_is_normalised_text() {
    let c: Crontab = "  0   */2 * *   * ".parse().unwrap();
    assert_eq!(c.to_string(), "0 */2 * * *");
    assert_eq!(Crontab::every_minutes(5).to_string(), "*/5 * * * *");
  }

  #[test]
  fn rejects_malformed_expressions() {
    assert!("* * * *".parse::<Crontab>().is_err());
    assert!("60 * * * *".parse::<Crontab>().is_err());
    assert!("*/0 * * * *".parse::<Crontab>().is_err());
    assert!("5-1 * * * *".parse::<Crontab>().is_err());
    assert!("a * * * *".parse::<Crontab>().is_err());
  }

  #[test]
  fn huge_step_selects_only_the_start() {
    let c: Crontab = "59/4294967295 * * * *".parse().unwrap();
    assert!(c.matches(at(2026, 3, 4, 10, 59)));
    assert!(!c.matches(at(2026, 3, 4, 10, 0)));
    assert!(!c.matches(at(2026, 3, 4, 11, 3)));
  }

  #[test]
  fn serde_uses_the_expression_string() {
    #[derive(Serialize, Deserialize)]
    struct Holder {
      when: Crontab,
    }
    let h: Holder = toml::from_str("when = \"0 3 * * *\"").unwrap();
    assert_eq!(h.when.to_string(), "0 3 * * *");
    assert!(toml::from_str::<Holder>("when = \"bad\"").is_err());
  }
}
