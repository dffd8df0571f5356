//! Per-source delay statistics: exact recomputation over the retained
//! history, per-category means, and the largest-delay event record.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{Category, CategorySummary, DelayHistory, DelayStats, MaxDelayRecord, SourceSummary};

/// Result of recording one admitted delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
  pub summary: SourceSummary,
  /// True when this delay replaced the source's max-delay record.
  pub max_changed: bool,
}

/// Record an admitted delay and return the fresh summary.
///
/// - Appends to the source history and the (source, category) history.
/// - Recomputes min/max/avg over the whole retained history (no running approximation).
/// - Replaces the max record only on a strictly greater delay.
pub fn record_delay(
  stats: &mut DelayStats,
  category: Category,
  delay: f64,
  observed_at: DateTime<Utc>,
  event: &Value,
) -> RecordOutcome {
  stats.delays.push(delay);
  stats.category_history(category).push(delay);

  let max_changed = match &stats.max_record {
    Some(record) => delay > record.delay,
    None => true,
  };
  if max_changed {
    stats.max_record = Some(MaxDelayRecord {
      observed_at,
      event: event.clone(),
      delay,
    });
  }

  RecordOutcome {
    summary: summarize(stats),
    max_changed,
  }
}

/// Snapshot of a source's statistics. All zeros before the first admission.
pub fn summarize(stats: &DelayStats) -> SourceSummary {
  let (min_delay, max_delay, avg_delay) = min_max_avg(&stats.delays);
  let categories = stats
    .by_category
    .iter()
    .map(|(category, history)| CategorySummary {
      code: category.code(),
      label: category.label(),
      count: history.len(),
      avg_delay: mean(history),
      latest_delay: history.latest().unwrap_or(0.0),
    })
    .collect();

  SourceSummary {
    min_delay,
    max_delay,
    avg_delay,
    latest_delay: stats.delays.latest().unwrap_or(0.0),
    categories,
  }
}

fn min_max_avg(history: &DelayHistory) -> (f64, f64, f64) {
  if history.is_empty() {
    return (0.0, 0.0, 0.0);
  }
  let mut min = f64::INFINITY;
  let mut max = f64::NEG_INFINITY;
  for d in history.iter() {
    min = min.min(d);
    max = max.max(d);
  }
  // Clamp guards against the mean drifting a ULP outside [min, max].
  let avg = mean(history).clamp(min, max);
  (min, max, avg)
}

fn mean(history: &DelayHistory) -> f64 {
  if history.is_empty() {
    return 0.0;
  }
  history.iter().sum::<f64>() / history.len() as f64
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::HistoryRetention;
  use chrono::TimeZone;
  use serde_json::json;

  fn at(sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, sec).unwrap()
  }

  #[test]
  fn first_delay_sets_everything() {
    let mut stats = DelayStats::new(HistoryRetention::Unbounded);
    let out = record_delay(&mut stats, Category::LineEvents, 2.5, at(0), &json!({"uuid": "a"}));
    assert!(out.max_changed);
    assert_eq!(out.summary.min_delay, 2.5);
    assert_eq!(out.summary.max_delay, 2.5);
    assert_eq!(out.summary.avg_delay, 2.5);
    assert_eq!(out.summary.latest_delay, 2.5);
    assert_eq!(out.summary.categories.len(), 1);
    assert_eq!(out.summary.categories[0].code, 101);
    assert_eq!(out.summary.categories[0].count, 1);
  }

  #[test]
  fn max_record_replaced_only_by_strictly_greater() {
    let mut stats = DelayStats::new(HistoryRetention::Unbounded);
    record_delay(&mut stats, Category::Tamper, 3.0, at(0), &json!({"uuid": "first"}));
    let tie = record_delay(&mut stats, Category::Tamper, 3.0, at(1), &json!({"uuid": "tie"}));
    assert!(!tie.max_changed);
    let lower = record_delay(&mut stats, Category::Crowd, 1.0, at(2), &json!({"uuid": "low"}));
    assert!(!lower.max_changed);
    assert_eq!(stats.max_record.as_ref().unwrap().event["uuid"], "first");

    let higher = record_delay(&mut stats, Category::Crowd, 4.25, at(3), &json!({"uuid": "high"}));
    assert!(higher.max_changed);
    let record = stats.max_record.as_ref().unwrap();
    assert_eq!(record.event["uuid"], "high");
    assert_eq!(record.observed_at, at(3));
  }

  #[test]
  fn min_avg_max_ordering_holds() {
    let mut stats = DelayStats::new(HistoryRetention::Unbounded);
    for (i, d) in [0.1, 7.3, 0.0, 2.2, 0.3, 0.1].iter().enumerate() {
      let out = record_delay(&mut stats, Category::ALL[i % 3], *d, at(i as u32), &json!({}));
      let s = out.summary;
      assert!(s.min_delay <= s.avg_delay && s.avg_delay <= s.max_delay, "{:?}", s);
    }
    let s = summarize(&stats);
    assert_eq!(s.min_delay, 0.0);
    assert_eq!(s.max_delay, 7.3);
    assert_eq!(s.latest_delay, 0.1);
  }

  #[test]
  fn per_category_means_are_independent() {
    let mut stats = DelayStats::new(HistoryRetention::Unbounded);
    record_delay(&mut stats, Category::Intrusion, 1.0, at(0), &json!({}));
    record_delay(&mut stats, Category::Intrusion, 3.0, at(1), &json!({}));
    record_delay(&mut stats, Category::Loitering, 10.0, at(2), &json!({}));
    let s = summarize(&stats);
    let intrusion = s.categories.iter().find(|c| c.code == 103).unwrap();
    let loitering = s.categories.iter().find(|c| c.code == 104).unwrap();
    assert_eq!((intrusion.count, intrusion.avg_delay, intrusion.latest_delay), (2, 2.0, 3.0));
    assert_eq!((loitering.count, loitering.avg_delay), (1, 10.0));
    assert!((s.avg_delay - 14.0 / 3.0).abs() < 1e-12);
  }

  #[test]
  fn windowed_retention_recomputes_over_window() {
    let mut stats = DelayStats::new(HistoryRetention::Window(2));
    record_delay(&mut stats, Category::QrCode, 9.0, at(0), &json!({"n": 1}));
    record_delay(&mut stats, Category::QrCode, 1.0, at(1), &json!({"n": 2}));
    let out = record_delay(&mut stats, Category::QrCode, 3.0, at(2), &json!({"n": 3}));
    assert_eq!(out.summary.max_delay, 3.0);
    assert_eq!(out.summary.min_delay, 1.0);
    // Max record is tracked across the run, not the window.
    assert_eq!(stats.max_record.as_ref().unwrap().delay, 9.0);
  }
}
