//! Monitor configuration: defaults plus `DELAY_MONITOR_*` environment overrides.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::MonitorError;

/// Warm-up events discarded per (source, category) before statistics begin.
pub const DEFAULT_WARMUP_THRESHOLD: u32 = 4;

/// How many admitted identities the in-memory ledger keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerRetention {
  /// Keep every identity for the whole run. Memory grows with event volume.
  #[default]
  Unbounded,
  /// Keep at most `n` identities, evicting the oldest admitted first.
  Capped(usize),
}

/// How many delays each per-source and per-category history keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryRetention {
  #[default]
  Unbounded,
  /// Fixed-size ring of the most recent `n` delays.
  Window(usize),
}

/// When summary and max-delay files are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryFlush {
  /// Rewrite on every admitted event.
  #[default]
  EveryEvent,
  /// Mark dirty on admission, rewrite on a timer (and once more at shutdown).
  Interval(Duration),
}

#[derive(Debug, Clone)]
pub struct Config {
  /// Websocket endpoint (`ws://` or `wss://`), including any query string.
  pub endpoint: String,
  /// JSON file mapping source id -> display name.
  pub sources_file: Option<PathBuf>,
  /// Root of all sink files; created at startup when absent.
  pub log_dir: PathBuf,
  pub warmup_threshold: u32,
  /// Resource classes requested for every source in the subscription.
  pub resources: Vec<String>,
  /// Event classes requested for every source in the subscription.
  pub event_classes: Vec<String>,
  pub ledger_retention: LedgerRetention,
  pub history_retention: HistoryRetention,
  pub summary_flush: SummaryFlush,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      endpoint: String::new(),
      sources_file: None,
      log_dir: PathBuf::from("logs"),
      warmup_threshold: DEFAULT_WARMUP_THRESHOLD,
      resources: vec!["pre".into(), "event".into()],
      event_classes: vec!["ALRS".into(), "ANNT".into()],
      ledger_retention: LedgerRetention::Unbounded,
      history_retention: HistoryRetention::Unbounded,
      summary_flush: SummaryFlush::EveryEvent,
    }
  }
}

impl Config {
  /// Defaults overridden by the process environment.
  pub fn from_env() -> Result<Self, MonitorError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Same as [`Config::from_env`] but reading variables through `lookup`.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut cfg = Self::default();

    cfg.endpoint = get("DELAY_MONITOR_URL")
      .ok_or_else(|| MonitorError::config("DELAY_MONITOR_URL", "must be set"))?;
    if !(cfg.endpoint.starts_with("ws://") || cfg.endpoint.starts_with("wss://")) {
      return Err(MonitorError::config(
        "DELAY_MONITOR_URL",
        "expected ws:// or wss:// scheme",
      ));
    }

    if let Some(v) = get("DELAY_MONITOR_SOURCES") {
      cfg.sources_file = Some(PathBuf::from(v));
    }
    if let Some(v) = get("DELAY_MONITOR_LOG_DIR") {
      cfg.log_dir = PathBuf::from(v);
    }
    if let Some(v) = get("DELAY_MONITOR_WARMUP") {
      cfg.warmup_threshold = parse_number("DELAY_MONITOR_WARMUP", &v)?;
    }
    if let Some(v) = get("DELAY_MONITOR_RESOURCES") {
      cfg.resources = split_csv(&v);
    }
    if let Some(v) = get("DELAY_MONITOR_EVENT_CLASSES") {
      cfg.event_classes = split_csv(&v);
    }
    if let Some(v) = get("DELAY_MONITOR_LEDGER_CAP") {
      cfg.ledger_retention = LedgerRetention::Capped(parse_positive("DELAY_MONITOR_LEDGER_CAP", &v)?);
    }
    if let Some(v) = get("DELAY_MONITOR_HISTORY_CAP") {
      cfg.history_retention = HistoryRetention::Window(parse_positive("DELAY_MONITOR_HISTORY_CAP", &v)?);
    }
    if let Some(v) = get("DELAY_MONITOR_FLUSH_MS") {
      let ms: u64 = parse_number("DELAY_MONITOR_FLUSH_MS", &v)?;
      if ms > 0 {
        cfg.summary_flush = SummaryFlush::Interval(Duration::from_millis(ms));
      }
    }

    Ok(cfg)
  }

  /// True when either in-memory structure may grow for the whole run.
  pub fn is_unbounded(&self) -> bool {
    self.ledger_retention == LedgerRetention::Unbounded
      || self.history_retention == HistoryRetention::Unbounded
  }
}

fn split_csv(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(|v| v.trim())
    .filter(|v| !v.is_empty())
    .map(|v| v.to_string())
    .collect()
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, MonitorError> {
  raw
    .trim()
    .parse::<T>()
    .map_err(|_| MonitorError::config(field, &format!("not a valid number: {:?}", raw)))
}

fn parse_positive(field: &str, raw: &str) -> Result<usize, MonitorError> {
  let n: usize = parse_number(field, raw)?;
  if n == 0 {
    return Err(MonitorError::config(field, "must be greater than zero"));
  }
  Ok(n)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name| map.get(name).cloned()
  }

  #[test]
  fn defaults_match_documented_values() {
    let cfg = Config::from_lookup(lookup(&[("DELAY_MONITOR_URL", "wss://example.test/events")])).unwrap();
    assert_eq!(cfg.warmup_threshold, 4);
    assert_eq!(cfg.log_dir, PathBuf::from("logs"));
    assert_eq!(cfg.resources, vec!["pre", "event"]);
    assert_eq!(cfg.event_classes, vec!["ALRS", "ANNT"]);
    assert_eq!(cfg.summary_flush, SummaryFlush::EveryEvent);
    assert!(cfg.is_unbounded());
  }

  #[test]
  fn missing_url_is_an_error() {
    let err = Config::from_lookup(lookup(&[])).unwrap_err();
    assert!(err.to_string().contains("DELAY_MONITOR_URL"));
  }

  #[test]
  fn non_websocket_url_rejected() {
    let err = Config::from_lookup(lookup(&[("DELAY_MONITOR_URL", "https://example.test")])).unwrap_err();
    assert!(err.to_string().contains("scheme"));
  }

  #[test]
  fn overrides_applied() {
    let cfg = Config::from_lookup(lookup(&[
      ("DELAY_MONITOR_URL", "ws://127.0.0.1:9000"),
      ("DELAY_MONITOR_LOG_DIR", "/tmp/dm"),
      ("DELAY_MONITOR_WARMUP", "2"),
      ("DELAY_MONITOR_EVENT_CLASSES", "ALRS, , ANNT,XYZ"),
      ("DELAY_MONITOR_LEDGER_CAP", "1000"),
      ("DELAY_MONITOR_HISTORY_CAP", "50"),
      ("DELAY_MONITOR_FLUSH_MS", "250"),
    ]))
    .unwrap();
    assert_eq!(cfg.warmup_threshold, 2);
    assert_eq!(cfg.log_dir, PathBuf::from("/tmp/dm"));
    assert_eq!(cfg.event_classes, vec!["ALRS", "ANNT", "XYZ"]);
    assert_eq!(cfg.ledger_retention, LedgerRetention::Capped(1000));
    assert_eq!(cfg.history_retention, HistoryRetention::Window(50));
    assert_eq!(cfg.summary_flush, SummaryFlush::Interval(Duration::from_millis(250)));
    assert!(!cfg.is_unbounded());
  }

  #[test]
  fn bad_numbers_rejected() {
    let err = Config::from_lookup(lookup(&[
      ("DELAY_MONITOR_URL", "ws://h"),
      ("DELAY_MONITOR_WARMUP", "four"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("DELAY_MONITOR_WARMUP"));

    let err = Config::from_lookup(lookup(&[
      ("DELAY_MONITOR_URL", "ws://h"),
      ("DELAY_MONITOR_LEDGER_CAP", "0"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("greater than zero"));
  }
}
