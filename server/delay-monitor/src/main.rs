//! Binary entrypoint: load config + source registry, connect, run until the
//! stream ends.
//!
//! Exit status is non-zero when the run ended on a transport or decoding
//! fault. Restarting is left to whatever supervises the process.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use delay_monitor::connection::subscription;
use delay_monitor::{Config, Engine, SourceRegistry, WsConnection};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("delay_monitor=info")))
    .init();

  // Only one provider is compiled in; ignore "already installed".
  let _ = rustls::crypto::ring::default_provider().install_default();

  let config = Config::from_env().context("loading configuration")?;
  let sources_file = config
    .sources_file
    .clone()
    .context("DELAY_MONITOR_SOURCES must point at the source registry file")?;
  let registry = SourceRegistry::from_json_file(&sources_file)
    .with_context(|| format!("loading source registry {}", sources_file.display()))?;
  if registry.is_empty() {
    bail!("source registry {} lists no sources", sources_file.display());
  }

  if config.is_unbounded() {
    warn!(
      ledger = ?config.ledger_retention,
      history = ?config.history_retention,
      "identity ledger and/or delay history are unbounded; memory grows for the life of the process"
    );
  }

  let request = subscription(&registry, &config.resources, &config.event_classes);
  let mut conn = WsConnection::connect(&config.endpoint, &request)
    .await
    .context("connecting to event stream")?;

  info!(
    sources = registry.len(),
    log_dir = %config.log_dir.display(),
    warmup = config.warmup_threshold,
    "delay-monitor started"
  );

  let mut engine = Engine::new(config, registry).context("opening log sinks")?;
  let end = engine
    .run_until(&mut conn, async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

  info!(?end, "delay-monitor stopped");
  Ok(())
}
