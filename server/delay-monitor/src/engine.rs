//! Core engine: owns all run state and drives frames through
//! demux -> admission -> statistics -> sinks on one control path.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Interval;
use tracing::{debug, error, info, trace};

use crate::admission::{AdmissionFilter, DropReason, Verdict};
use crate::config::{Config, SummaryFlush};
use crate::connection::FrameSource;
use crate::demux;
use crate::error::MonitorError;
use crate::registry::SourceRegistry;
use crate::sink::SinkSet;
use crate::stats;
use crate::types::SourceState;

/// What happened to one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
  /// Sub-payloads for registered sources (each one was stream-logged).
  pub sub_payloads: usize,
  pub admitted: usize,
  /// Policy drops: duplicate, warm-up, repeated timestamp, negative delay.
  pub dropped: usize,
  /// Events without an identity.
  pub record_faults: usize,
}

/// Why a run ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
  PeerClosed,
  Shutdown,
}

/// The delay monitor. Holds every piece of mutable state for a run.
pub struct Engine {
  config: Config,
  registry: SourceRegistry,
  states: BTreeMap<String, SourceState>,
  filter: AdmissionFilter,
  sinks: SinkSet,
}

impl Engine {
  /// Build per-source state and open all sinks under `config.log_dir`.
  pub fn new(config: Config, registry: SourceRegistry) -> Result<Self, MonitorError> {
    let sinks = SinkSet::open(&config.log_dir, &registry, config.summary_flush)?;
    let states = registry
      .ids()
      .map(|id| (id.to_string(), SourceState::new(config.history_retention)))
      .collect();
    let filter = AdmissionFilter::new(config.warmup_threshold, config.ledger_retention);
    Ok(Self {
      config,
      registry,
      states,
      filter,
      sinks,
    })
  }

  pub fn registry(&self) -> &SourceRegistry {
    &self.registry
  }

  pub fn state(&self, source_id: &str) -> Option<&SourceState> {
    self.states.get(source_id)
  }

  pub fn filter(&self) -> &AdmissionFilter {
    &self.filter
  }

  pub fn sinks(&self) -> &SinkSet {
    &self.sinks
  }

  /// Process one raw frame received at `observed_at`.
  ///
  /// Errors are fatal: malformed frame, unparsable own timestamp, sink I/O.
  pub fn process_frame(&mut self, raw: &str, observed_at: DateTime<Utc>) -> Result<FrameReport, MonitorError> {
    let frame = demux::parse_frame(raw)?;
    let mut report = FrameReport::default();

    for part in demux::split(&frame, &self.registry, observed_at) {
      report.sub_payloads += 1;
      self.sinks.append_raw(part.source_id, part.observed_at, part.payload)?;

      for (_, detail) in demux::event_details(part.payload) {
        let state = match self.states.get_mut(part.source_id) {
          Some(s) => s,
          None => continue,
        };
        let verdict = self
          .filter
          .evaluate(part.source_id, state, detail, part.observed_at, &mut self.sinks)?;

        let admitted = match verdict {
          Verdict::Admitted(a) => a,
          Verdict::Dropped(DropReason::UnknownCategory) => continue,
          Verdict::Dropped(DropReason::MissingIdentity) => {
            report.record_faults += 1;
            continue;
          }
          Verdict::Dropped(_) => {
            report.dropped += 1;
            continue;
          }
        };

        report.admitted += 1;
        let outcome = stats::record_delay(
          &mut state.stats,
          admitted.category,
          admitted.delay,
          part.observed_at,
          detail,
        );
        debug!(
          source = part.source_id,
          ns = admitted.category.code(),
          delay = admitted.delay,
          "event admitted"
        );
        self.sinks.write_summary(part.source_id, &outcome.summary)?;

        if outcome.max_changed {
          let records = self
            .states
            .iter()
            .filter_map(|(id, s)| s.stats.max_record.as_ref().map(|r| (id.as_str(), r)));
          self.sinks.write_max_delays(records)?;
        }
      }
    }

    Ok(report)
  }

  /// Consume frames until the peer closes or a fatal fault occurs.
  pub async fn run<S: FrameSource>(&mut self, source: &mut S) -> Result<SessionEnd, MonitorError> {
    self.run_until(source, std::future::pending::<()>()).await
  }

  /// Like [`Engine::run`], also stopping when `shutdown` resolves. Sinks are
  /// closed on every exit path before this returns.
  pub async fn run_until<S, F>(&mut self, source: &mut S, shutdown: F) -> Result<SessionEnd, MonitorError>
  where
    S: FrameSource,
    F: Future<Output = ()>,
  {
    let outcome = self.drive(source, shutdown).await;
    match &outcome {
      Ok(end) => info!(?end, "session ended"),
      Err(e) => error!(error = %e, "session terminated"),
    }
    self.close();
    outcome
  }

  /// Release every sink handle. Returns how many were closed by this call.
  pub fn close(&mut self) -> usize {
    let closed = self.sinks.close();
    if closed > 0 {
      debug!(closed, "sink handles released");
    }
    closed
  }

  async fn drive<S, F>(&mut self, source: &mut S, shutdown: F) -> Result<SessionEnd, MonitorError>
  where
    S: FrameSource,
    F: Future<Output = ()>,
  {
    tokio::pin!(shutdown);
    let mut ticker = match self.config.summary_flush {
      SummaryFlush::Interval(period) => Some(tokio::time::interval(period.max(Duration::from_millis(1)))),
      SummaryFlush::EveryEvent => None,
    };

    loop {
      let next = tokio::select! {
        _ = &mut shutdown => return Ok(SessionEnd::Shutdown),
        _ = tick(&mut ticker) => {
          self.sinks.flush_pending()?;
          continue;
        }
        frame = source.next_frame() => frame?,
      };

      let raw = match next {
        Some(raw) => raw,
        None => return Ok(SessionEnd::PeerClosed),
      };
      let report = self.process_frame(&raw, Utc::now())?;
      trace!(?report, "frame processed");
    }
  }
}

async fn tick(ticker: &mut Option<Interval>) {
  match ticker {
    Some(t) => {
      t.tick().await;
    }
    None => std::future::pending::<()>().await,
  }
}
