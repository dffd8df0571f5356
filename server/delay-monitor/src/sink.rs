//! Flat-file sinks.
//!
//! Layout under the log directory:
//! - `stream/<name>_<id>_stream.log`: append-only raw sub-payloads, one per line.
//! - `processed_event_uuids.log`: append-only identity journal.
//! - `<name>_<id>.log`: per-source summary, overwritten.
//! - `maxeventdelay.log`: every source's max-delay record, overwritten.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::admission::IdentityJournal;
use crate::config::SummaryFlush;
use crate::error::MonitorError;
use crate::registry::{sanitize_name, SourceRegistry};
use crate::types::{MaxDelayRecord, SourceSummary};

pub const STREAM_DIR: &str = "stream";
pub const LEDGER_FILE: &str = "processed_event_uuids.log";
pub const MAX_DELAY_FILE: &str = "maxeventdelay.log";

struct SourceSink {
  name: String,
  stream: File,
  summary_path: PathBuf,
}

/// All sink handles for one run. Handles are released exactly once, by
/// [`SinkSet::close`] or on drop.
pub struct SinkSet {
  sources: BTreeMap<String, SourceSink>,
  ledger: Option<File>,
  max_delay_path: PathBuf,
  flush: SummaryFlush,
  pending_summaries: BTreeMap<String, SourceSummary>,
  pending_max: Option<String>,
  open: bool,
}

impl SinkSet {
  /// Create the log directory tree and open every append-only handle.
  pub fn open(log_dir: &Path, registry: &SourceRegistry, flush: SummaryFlush) -> Result<Self, MonitorError> {
    let stream_dir = log_dir.join(STREAM_DIR);
    fs::create_dir_all(&stream_dir)?;

    let mut sources = BTreeMap::new();
    for (id, name) in registry.iter() {
      let stem = format!("{}_{}", sanitize_name(name), id);
      let stream = append_handle(&stream_dir.join(format!("{}_stream.log", stem)))?;
      sources.insert(
        id.to_string(),
        SourceSink {
          name: name.to_string(),
          stream,
          summary_path: log_dir.join(format!("{}.log", stem)),
        },
      );
    }

    let ledger = append_handle(&log_dir.join(LEDGER_FILE))?;
    debug!(dir = %log_dir.display(), sources = sources.len(), "sinks opened");

    Ok(Self {
      sources,
      ledger: Some(ledger),
      max_delay_path: log_dir.join(MAX_DELAY_FILE),
      flush,
      pending_summaries: BTreeMap::new(),
      pending_max: None,
      open: true,
    })
  }

  pub fn is_open(&self) -> bool {
    self.open
  }

  /// Number of handles currently held (one stream log per source + the journal).
  pub fn open_handles(&self) -> usize {
    if !self.open {
      return 0;
    }
    self.sources.len() + usize::from(self.ledger.is_some())
  }

  /// Append one received sub-payload to the source's stream log.
  pub fn append_raw(&mut self, source_id: &str, observed_at: DateTime<Utc>, payload: &Value) -> Result<(), MonitorError> {
    let sink = self.source_mut(source_id)?;
    let line = format!("{} -- {}\n", iso_timestamp(observed_at), serde_json::to_string(payload)?);
    sink.stream.write_all(line.as_bytes())?;
    Ok(())
  }

  /// Overwrite (or, with interval flushing, stage) a source's summary.
  pub fn write_summary(&mut self, source_id: &str, summary: &SourceSummary) -> Result<(), MonitorError> {
    self.source_mut(source_id)?;
    match self.flush {
      SummaryFlush::EveryEvent => self.rewrite_summary(source_id, summary),
      SummaryFlush::Interval(_) => {
        self.pending_summaries.insert(source_id.to_string(), summary.clone());
        Ok(())
      }
    }
  }

  /// Overwrite (or stage) the max-delay file with every source's current record.
  pub fn write_max_delays<'a, I>(&mut self, records: I) -> Result<(), MonitorError>
  where
    I: IntoIterator<Item = (&'a str, &'a MaxDelayRecord)>,
  {
    self.ensure_open()?;
    let text = self.render_max_delays(records)?;
    match self.flush {
      SummaryFlush::EveryEvent => {
        fs::write(&self.max_delay_path, text)?;
        Ok(())
      }
      SummaryFlush::Interval(_) => {
        self.pending_max = Some(text);
        Ok(())
      }
    }
  }

  /// Write everything staged by interval flushing. No-op otherwise.
  pub fn flush_pending(&mut self) -> Result<(), MonitorError> {
    let pending = std::mem::take(&mut self.pending_summaries);
    for (id, summary) in &pending {
      self.rewrite_summary(id, summary)?;
    }
    if let Some(text) = self.pending_max.take() {
      fs::write(&self.max_delay_path, text)?;
    }
    Ok(())
  }

  /// Flush staged writes and release every handle. Returns how many handles
  /// were closed; a second call closes nothing.
  pub fn close(&mut self) -> usize {
    if !self.open {
      return 0;
    }
    if let Err(e) = self.flush_pending() {
      warn!(error = %e, "failed to flush pending summaries on close");
    }
    let mut closed = 0;
    for (id, sink) in std::mem::take(&mut self.sources) {
      if let Err(e) = sink.stream.sync_all() {
        warn!(source = %id, error = %e, "stream log sync failed");
      }
      drop(sink.stream);
      closed += 1;
    }
    if let Some(ledger) = self.ledger.take() {
      if let Err(e) = ledger.sync_all() {
        warn!(error = %e, "identity journal sync failed");
      }
      closed += 1;
    }
    self.open = false;
    debug!(closed, "sinks closed");
    closed
  }

  fn rewrite_summary(&mut self, source_id: &str, summary: &SourceSummary) -> Result<(), MonitorError> {
    let sink = self.source_mut(source_id)?;
    let text = render_summary(&sink.name, source_id, summary);
    fs::write(&sink.summary_path, text)?;
    Ok(())
  }

  fn render_max_delays<'a, I>(&self, records: I) -> Result<String, MonitorError>
  where
    I: IntoIterator<Item = (&'a str, &'a MaxDelayRecord)>,
  {
    let mut out = String::new();
    for (id, record) in records {
      let name = self.sources.get(id).map(|s| s.name.as_str()).unwrap_or(id);
      out.push_str(&format!("Delay monitor ({} - {}):\n", name, id));
      out.push_str("Max Delay:\n");
      out.push_str(&format!(
        "{} : {}\n\n",
        iso_timestamp(record.observed_at),
        pretty_json(&record.event)?
      ));
    }
    Ok(out)
  }

  fn source_mut(&mut self, source_id: &str) -> Result<&mut SourceSink, MonitorError> {
    self.ensure_open()?;
    self
      .sources
      .get_mut(source_id)
      .ok_or_else(|| MonitorError::Io(io::Error::new(io::ErrorKind::NotFound, format!("no sink for source {}", source_id))))
  }

  fn ensure_open(&self) -> Result<(), MonitorError> {
    if self.open {
      Ok(())
    } else {
      Err(MonitorError::Io(io::Error::other("sinks already closed")))
    }
  }
}

impl IdentityJournal for SinkSet {
  fn record_identity(&mut self, identity: &str) -> Result<(), MonitorError> {
    let ledger = self
      .ledger
      .as_mut()
      .ok_or_else(|| MonitorError::Io(io::Error::other("identity journal closed")))?;
    ledger.write_all(format!("{}\n", identity).as_bytes())?;
    Ok(())
  }
}

impl Drop for SinkSet {
  fn drop(&mut self) {
    self.close();
  }
}

/// Text of a per-source summary file.
pub fn render_summary(name: &str, source_id: &str, summary: &SourceSummary) -> String {
  let mut lines = vec![
    format!("Delay monitor ({} - {}):", name, source_id),
    format!("Min delay = {:.4} seconds", summary.min_delay),
    format!("Max delay = {:.4} seconds", summary.max_delay),
    format!("Avg delay = {:.4} seconds", summary.avg_delay),
    format!("Latest event delay = {:.4} seconds", summary.latest_delay),
    String::new(),
  ];
  if !summary.categories.is_empty() {
    lines.push("Matching ns values and descriptions:".to_string());
    for c in &summary.categories {
      lines.push(format!(
        "{} ({}): {} events, Avg delay = {:.4} seconds",
        c.code, c.label, c.count, c.avg_delay
      ));
      lines.push(format!("Latest delay for {} = {:.4} seconds", c.code, c.latest_delay));
    }
  }
  lines.join("\n")
}

fn append_handle(path: &Path) -> Result<File, MonitorError> {
  Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn iso_timestamp(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn pretty_json(value: &Value) -> Result<String, MonitorError> {
  let mut buf = Vec::new();
  let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
  let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
  value.serialize(&mut ser)?;
  String::from_utf8(buf).map_err(|e| MonitorError::decode(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::CategorySummary;
  use chrono::TimeZone;
  use serde_json::json;
  use std::time::Duration;

  fn registry() -> SourceRegistry {
    SourceRegistry::new([("cam-1", "Front/Door")])
  }

  fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
  }

  fn summary(avg: f64) -> SourceSummary {
    SourceSummary {
      min_delay: 1.0,
      max_delay: 3.0,
      avg_delay: avg,
      latest_delay: 3.0,
      categories: vec![CategorySummary {
        code: 103,
        label: "Intrusion",
        count: 2,
        avg_delay: avg,
        latest_delay: 3.0,
      }],
    }
  }

  #[test]
  fn creates_layout_and_appends_raw_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut sinks = SinkSet::open(dir.path(), &registry(), SummaryFlush::EveryEvent).unwrap();
    sinks.append_raw("cam-1", at(), &json!({"event": {}})).unwrap();
    sinks.append_raw("cam-1", at(), &json!({"pre": 1})).unwrap();
    sinks.close();

    let raw = fs::read_to_string(dir.path().join("stream/Front_Door_cam-1_stream.log")).unwrap();
    let lines: Vec<_> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "2025-01-15T10:00:00.000000+00:00 -- {\"event\":{}}");
  }

  #[test]
  fn summary_is_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let mut sinks = SinkSet::open(dir.path(), &registry(), SummaryFlush::EveryEvent).unwrap();
    sinks.write_summary("cam-1", &summary(1.5)).unwrap();
    sinks.write_summary("cam-1", &summary(2.0)).unwrap();

    let text = fs::read_to_string(dir.path().join("Front_Door_cam-1.log")).unwrap();
    assert!(text.starts_with("Delay monitor (Front/Door - cam-1):"));
    assert!(text.contains("Avg delay = 2.0000 seconds"));
    assert!(!text.contains("1.5000"));
    assert!(text.contains("103 (Intrusion): 2 events, Avg delay = 2.0000 seconds"));
  }

  #[test]
  fn journal_appends_one_identity_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let mut sinks = SinkSet::open(dir.path(), &registry(), SummaryFlush::EveryEvent).unwrap();
    sinks.record_identity("u-1").unwrap();
    sinks.record_identity("u-2").unwrap();
    sinks.close();
    let text = fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap();
    assert_eq!(text, "u-1\nu-2\n");
  }

  #[test]
  fn max_delay_file_uses_four_space_indent() {
    let dir = tempfile::tempdir().unwrap();
    let mut sinks = SinkSet::open(dir.path(), &registry(), SummaryFlush::EveryEvent).unwrap();
    let record = MaxDelayRecord {
      observed_at: at(),
      event: json!({"uuid": "u-9"}),
      delay: 4.0,
    };
    sinks.write_max_delays([("cam-1", &record)]).unwrap();
    let text = fs::read_to_string(dir.path().join(MAX_DELAY_FILE)).unwrap();
    assert!(text.contains("Max Delay:\n2025-01-15T10:00:00.000000+00:00 : {\n    \"uuid\": \"u-9\"\n}"));
  }

  #[test]
  fn interval_flush_defers_until_flushed() {
    let dir = tempfile::tempdir().unwrap();
    let mut sinks = SinkSet::open(dir.path(), &registry(), SummaryFlush::Interval(Duration::from_secs(1))).unwrap();
    sinks.write_summary("cam-1", &summary(2.0)).unwrap();
    let path = dir.path().join("Front_Door_cam-1.log");
    assert!(!path.exists());
    sinks.flush_pending().unwrap();
    assert!(path.exists());
  }

  #[test]
  fn close_is_idempotent_and_counts_handles() {
    let dir = tempfile::tempdir().unwrap();
    let mut sinks = SinkSet::open(dir.path(), &registry(), SummaryFlush::Interval(Duration::from_secs(60))).unwrap();
    sinks.write_summary("cam-1", &summary(2.0)).unwrap();
    assert_eq!(sinks.open_handles(), 2);
    assert_eq!(sinks.close(), 2);
    assert_eq!(sinks.close(), 0);
    assert!(!sinks.is_open());
    // Pending summary was flushed on close.
    assert!(dir.path().join("Front_Door_cam-1.log").exists());
    assert!(sinks.append_raw("cam-1", at(), &json!({})).is_err());
  }
}
