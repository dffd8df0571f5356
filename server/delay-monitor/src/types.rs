//! Core types for the delay monitor (wire contracts + per-source state).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::config::HistoryRetention;

// ---------------------------------------------------------------------------
// Categories (static table, codes 101..=112)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
  LineEvents,
  ObjectTracking,
  Intrusion,
  Loitering,
  Tamper,
  ObjectLeftRemoved,
  FallDuress,
  Crowd,
  WrongDirection,
  QrCode,
  IoOutput,
  IoInput,
}

impl Category {
  pub const ALL: [Category; 12] = [
    Self::LineEvents,
    Self::ObjectTracking,
    Self::Intrusion,
    Self::Loitering,
    Self::Tamper,
    Self::ObjectLeftRemoved,
    Self::FallDuress,
    Self::Crowd,
    Self::WrongDirection,
    Self::QrCode,
    Self::IoOutput,
    Self::IoInput,
  ];

  pub fn from_code(code: i64) -> Option<Self> {
    match code {
      101 => Some(Self::LineEvents),
      102 => Some(Self::ObjectTracking),
      103 => Some(Self::Intrusion),
      104 => Some(Self::Loitering),
      105 => Some(Self::Tamper),
      106 => Some(Self::ObjectLeftRemoved),
      107 => Some(Self::FallDuress),
      108 => Some(Self::Crowd),
      109 => Some(Self::WrongDirection),
      110 => Some(Self::QrCode),
      111 => Some(Self::IoOutput),
      112 => Some(Self::IoInput),
      _ => None,
    }
  }

  pub fn code(self) -> u16 {
    match self {
      Self::LineEvents => 101,
      Self::ObjectTracking => 102,
      Self::Intrusion => 103,
      Self::Loitering => 104,
      Self::Tamper => 105,
      Self::ObjectLeftRemoved => 106,
      Self::FallDuress => 107,
      Self::Crowd => 108,
      Self::WrongDirection => 109,
      Self::QrCode => 110,
      Self::IoOutput => 111,
      Self::IoInput => 112,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::LineEvents => "Line Events (counting and line crossing)",
      Self::ObjectTracking => "Object Tracking",
      Self::Intrusion => "Intrusion",
      Self::Loitering => "Loitering",
      Self::Tamper => "Tamper",
      Self::ObjectLeftRemoved => "ObjectLeftRemoved",
      Self::FallDuress => "Fall Duress",
      Self::Crowd => "Crowd",
      Self::WrongDirection => "Wrong Direction",
      Self::QrCode => "QRCode",
      Self::IoOutput => "IO Output Record",
      Self::IoInput => "IO Input Record",
    }
  }
}

// ---------------------------------------------------------------------------
// Outbound subscription (JSON contract — sent once after connect)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFilter {
  pub resource: Vec<String>,
  pub event: Vec<String>,
}

/// Subscription request naming every source on the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
  #[serde(rename = "cameras")]
  pub sources: BTreeMap<String, SourceFilter>,
}

// ---------------------------------------------------------------------------
// Demultiplexed sub-payload
// ---------------------------------------------------------------------------

/// One source's slice of a frame, stamped with the frame's receipt time.
#[derive(Debug, Clone, Copy)]
pub struct SubPayload<'a> {
  pub source_id: &'a str,
  pub payload: &'a Value,
  pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Delay history (per source and per (source, category))
// ---------------------------------------------------------------------------

/// Delays in seconds, oldest first, optionally capped to a ring of recent values.
#[derive(Debug, Clone, Default)]
pub struct DelayHistory {
  values: VecDeque<f64>,
  cap: Option<usize>,
}

impl DelayHistory {
  pub fn new(retention: HistoryRetention) -> Self {
    let cap = match retention {
      HistoryRetention::Unbounded => None,
      HistoryRetention::Window(n) => Some(n.max(1)),
    };
    Self {
      values: VecDeque::new(),
      cap,
    }
  }

  pub fn push(&mut self, delay: f64) {
    if let Some(cap) = self.cap {
      while self.values.len() >= cap {
        self.values.pop_front();
      }
    }
    self.values.push_back(delay);
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn latest(&self) -> Option<f64> {
    self.values.back().copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
    self.values.iter().copied()
  }
}

/// The single largest-delay admitted event of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxDelayRecord {
  pub observed_at: DateTime<Utc>,
  /// Event detail exactly as received.
  pub event: Value,
  pub delay: f64,
}

/// Delay statistics for one source.
#[derive(Debug, Clone)]
pub struct DelayStats {
  pub delays: DelayHistory,
  pub by_category: BTreeMap<Category, DelayHistory>,
  pub max_record: Option<MaxDelayRecord>,
  retention: HistoryRetention,
}

impl DelayStats {
  pub fn new(retention: HistoryRetention) -> Self {
    Self {
      delays: DelayHistory::new(retention),
      by_category: BTreeMap::new(),
      max_record: None,
      retention,
    }
  }

  pub fn category_history(&mut self, category: Category) -> &mut DelayHistory {
    let retention = self.retention;
    self
      .by_category
      .entry(category)
      .or_insert_with(|| DelayHistory::new(retention))
  }
}

// ---------------------------------------------------------------------------
// Per-source state (created at startup, lives for the run)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SourceState {
  /// own_timestamp of the most recently admitted event (arrival order, not
  /// the largest seen).
  pub last_admitted: Option<DateTime<Utc>>,
  /// Warm-up counters; each saturates at the configured threshold.
  pub warmup: HashMap<Category, u32>,
  pub stats: DelayStats,
}

impl SourceState {
  pub fn new(retention: HistoryRetention) -> Self {
    Self {
      last_admitted: None,
      warmup: HashMap::new(),
      stats: DelayStats::new(retention),
    }
  }

  pub fn warmup_count(&self, category: Category) -> u32 {
    self.warmup.get(&category).copied().unwrap_or(0)
  }
}

// ---------------------------------------------------------------------------
// Summary snapshot (what the summary sink renders)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySummary {
  pub code: u16,
  pub label: &'static str,
  pub count: usize,
  pub avg_delay: f64,
  pub latest_delay: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
  pub min_delay: f64,
  pub max_delay: f64,
  pub avg_delay: f64,
  pub latest_delay: f64,
  pub categories: Vec<CategorySummary>,
}
