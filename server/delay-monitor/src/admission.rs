//! Admission filter: identity dedup, per-(source, category) warm-up gate,
//! repeated-timestamp and negative-delay drops.
//!
//! Every statistic downstream is computed only over events this filter admits.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tracing::{trace, warn};

use crate::config::LedgerRetention;
use crate::error::MonitorError;
use crate::types::{Category, SourceState};

/// Wire format of an event's own timestamp (UTC).
pub const OWN_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%.6f";

/// Byte length of `YYYYMMDDHHMMSS.ffffff`.
const OWN_TIMESTAMP_LEN: usize = 21;

/// Durable record of identities, written before the in-memory ledger changes.
pub trait IdentityJournal {
  fn record_identity(&mut self, identity: &str) -> Result<(), MonitorError>;
}

impl IdentityJournal for Vec<String> {
  fn record_identity(&mut self, identity: &str) -> Result<(), MonitorError> {
    self.push(identity.to_string());
    Ok(())
  }
}

/// Set of identities already seen by the filter.
#[derive(Debug, Clone, Default)]
pub struct IdentityLedger {
  seen: HashSet<String>,
  /// Insertion order; only maintained when capped.
  order: VecDeque<String>,
  retention: LedgerRetention,
}

impl IdentityLedger {
  pub fn new(retention: LedgerRetention) -> Self {
    Self {
      seen: HashSet::new(),
      order: VecDeque::new(),
      retention,
    }
  }

  pub fn contains(&self, identity: &str) -> bool {
    self.seen.contains(identity)
  }

  /// Insert an identity. With a cap, the oldest entries are evicted first;
  /// identities are never re-touched after insertion so this is also LRU order.
  pub fn insert(&mut self, identity: &str) -> bool {
    if !self.seen.insert(identity.to_string()) {
      return false;
    }
    if let LedgerRetention::Capped(cap) = self.retention {
      self.order.push_back(identity.to_string());
      while self.order.len() > cap.max(1) {
        if let Some(oldest) = self.order.pop_front() {
          self.seen.remove(&oldest);
        }
      }
    }
    true
  }

  pub fn len(&self) -> usize {
    self.seen.len()
  }

  pub fn is_empty(&self) -> bool {
    self.seen.is_empty()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
  /// `ns` missing or not in the category table; not an event of interest.
  UnknownCategory,
  /// Record fault: no identity to dedup on.
  MissingIdentity,
  Duplicate,
  /// Warm-up suppression; `count` is the pair's counter after this event.
  WarmUp { count: u32 },
  RepeatedTimestamp,
  NegativeDelay,
}

/// An event that passed every gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admitted {
  pub category: Category,
  pub own_timestamp: DateTime<Utc>,
  /// Seconds between own timestamp and receipt; never negative.
  pub delay: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
  Admitted(Admitted),
  Dropped(DropReason),
}

impl Verdict {
  pub fn is_admitted(&self) -> bool {
    matches!(self, Self::Admitted(_))
  }
}

pub struct AdmissionFilter {
  ledger: IdentityLedger,
  warmup_threshold: u32,
}

impl AdmissionFilter {
  pub fn new(warmup_threshold: u32, retention: LedgerRetention) -> Self {
    Self {
      ledger: IdentityLedger::new(retention),
      warmup_threshold,
    }
  }

  pub fn ledger(&self) -> &IdentityLedger {
    &self.ledger
  }

  pub fn warmup_threshold(&self) -> u32 {
    self.warmup_threshold
  }

  /// Run one event detail through the gates for `source_id`.
  ///
  /// Returns `Err` only for faults fatal to the run: a failed journal write or
  /// an own timestamp that is missing or cannot be parsed.
  pub fn evaluate<J: IdentityJournal>(
    &mut self,
    source_id: &str,
    state: &mut SourceState,
    detail: &Value,
    observed_at: DateTime<Utc>,
    journal: &mut J,
  ) -> Result<Verdict, MonitorError> {
    let category = match detail.get("ns").and_then(Value::as_i64).and_then(Category::from_code) {
      Some(c) => c,
      None => return Ok(Verdict::Dropped(DropReason::UnknownCategory)),
    };

    let identity = match detail.get("uuid").and_then(Value::as_str).filter(|s| !s.is_empty()) {
      Some(id) => id,
      None => {
        warn!(source = source_id, ns = category.code(), "event missing uuid, skipping");
        return Ok(Verdict::Dropped(DropReason::MissingIdentity));
      }
    };

    if self.ledger.contains(identity) {
      trace!(source = source_id, uuid = identity, "duplicate delivery");
      return Ok(Verdict::Dropped(DropReason::Duplicate));
    }

    // Journal first: a crash in between can only duplicate a log line.
    journal.record_identity(identity)?;
    self.ledger.insert(identity);

    let counter = state.warmup.entry(category).or_insert(0);
    if *counter < self.warmup_threshold {
      *counter += 1;
      trace!(source = source_id, ns = category.code(), count = *counter, "warm-up suppression");
      return Ok(Verdict::Dropped(DropReason::WarmUp { count: *counter }));
    }

    let raw_ts = detail
      .get("timestamp")
      .and_then(Value::as_str)
      .ok_or_else(|| MonitorError::decode(format!("event {} has no timestamp", identity)))?;
    let own_timestamp = parse_own_timestamp(raw_ts)?;

    if state.last_admitted == Some(own_timestamp) {
      trace!(source = source_id, uuid = identity, "repeated timestamp");
      return Ok(Verdict::Dropped(DropReason::RepeatedTimestamp));
    }

    let delay = delay_seconds(observed_at, own_timestamp);
    if delay < 0.0 {
      trace!(source = source_id, uuid = identity, delay, "negative delay");
      return Ok(Verdict::Dropped(DropReason::NegativeDelay));
    }

    state.last_admitted = Some(own_timestamp);

    Ok(Verdict::Admitted(Admitted {
      category,
      own_timestamp,
      delay,
    }))
  }
}

/// Parse `YYYYMMDDHHMMSS.ffffff` as UTC. The width is fixed: no padding, no
/// missing or shortened fraction.
pub fn parse_own_timestamp(raw: &str) -> Result<DateTime<Utc>, MonitorError> {
  let bytes = raw.as_bytes();
  let well_formed = bytes.len() == OWN_TIMESTAMP_LEN
    && bytes
      .iter()
      .enumerate()
      .all(|(i, b)| if i == 14 { *b == b'.' } else { b.is_ascii_digit() });
  if !well_formed {
    return Err(MonitorError::timestamp(raw, "expected YYYYMMDDHHMMSS.ffffff"));
  }
  NaiveDateTime::parse_from_str(raw, OWN_TIMESTAMP_FORMAT)
    .map(|naive| naive.and_utc())
    .map_err(|e| MonitorError::timestamp(raw, e.to_string()))
}

/// Signed seconds from `own_timestamp` to `observed_at`, microsecond resolution.
pub fn delay_seconds(observed_at: DateTime<Utc>, own_timestamp: DateTime<Utc>) -> f64 {
  let elapsed = observed_at.signed_duration_since(own_timestamp);
  match elapsed.num_microseconds() {
    Some(us) => us as f64 / 1_000_000.0,
    None => elapsed.num_milliseconds() as f64 / 1_000.0,
  }
}
